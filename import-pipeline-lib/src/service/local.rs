use std::cmp::Reverse;
use std::collections::{HashMap, HashSet};
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use indexmap::IndexMap;
use serde_json::Value;
use uuid::Uuid;

use super::ImportService;
use crate::config::{EntityDefinition, FieldDefinition, PipelineConfig};
use crate::error::{ProcessingState, ServiceError};
use crate::excel::ExcelReader;
use crate::intake::{CandidateFile, ImportBatch};
use crate::mapping::{ColumnMapping, MappingEditor};
use crate::types::{AnalysisResult, CommitResult, ExtraParams, PreviewResult, Row, TargetSchema};
use crate::utils::normalize_column_name;

struct ParsedBatch {
    entity_type: String,
    rows: Vec<Row>,
}

/// [`ImportService`] that reads the batch from local disk and writes committed
/// records as JSON. Parsed rows are held in memory between analyze and commit.
pub struct LocalImportService {
    config: Arc<PipelineConfig>,
    imports: Mutex<HashMap<Uuid, ParsedBatch>>,
}

impl LocalImportService {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config: Arc::new(config),
            imports: Mutex::new(HashMap::new()),
        }
    }

    /// Number of analysed batches that have not been committed yet.
    pub fn pending_imports(&self) -> usize {
        self.imports.lock().map(|imports| imports.len()).unwrap_or(0)
    }

    fn imports(&self) -> Result<MutexGuard<'_, HashMap<Uuid, ParsedBatch>>, ServiceError> {
        self.imports
            .lock()
            .map_err(|_| ServiceError::Processing("Import cache lock poisoned".into()))
    }

    fn read_file(
        &self,
        file: &CandidateFile,
    ) -> Result<(Vec<String>, Vec<Vec<String>>), ServiceError> {
        let path = file.path.as_deref().ok_or_else(|| {
            ServiceError::Processing(format!("{} has no location on disk", file.name))
        })?;
        tracing::debug!("Reading {} from {}", file.name, path.display());

        match file.extension.as_str() {
            "xlsx" | "xls" => {
                let mut rows = ExcelReader::open(path)?.first_sheet_rows()?.into_iter();
                let headers = rows.next().unwrap_or_default();
                Ok((headers, rows.collect()))
            }
            "txt" => read_delimited(path, sniff_delimiter(path)?),
            _ => read_delimited(path, b','),
        }
    }

    fn choose_entity(&self, columns: &[String]) -> Result<&EntityDefinition, ServiceError> {
        if let Some(forced) = &self.config.entity_type {
            return self.config.entity(forced).ok_or_else(|| {
                ServiceError::Processing(format!("Entity type '{}' is not configured", forced))
            });
        }

        let normalized: Vec<String> = columns.iter().map(|c| normalize_column_name(c)).collect();
        self.config
            .entities
            .iter()
            .enumerate()
            .max_by_key(|(i, entity)| {
                let score = normalized
                    .iter()
                    .filter(|c| entity.fields.iter().any(|f| field_matches(f, c)))
                    .count();
                // Ties go to the entity listed first
                (score, Reverse(*i))
            })
            .map(|(_, entity)| entity)
            .ok_or_else(|| ServiceError::Processing("No target entities are configured".into()))
    }
}

#[async_trait]
impl ImportService for LocalImportService {
    async fn analyze(&self, batch: &ImportBatch) -> Result<AnalysisResult, ServiceError> {
        if batch.is_empty() {
            return Err(ServiceError::Processing("No files to analyze".into()));
        }
        tracing::info!("Analyzing {} file(s)", batch.len());

        let mut state = ProcessingState::new();
        let mut columns: Vec<String> = Vec::new();
        let mut rows: Vec<Row> = Vec::new();

        for file in batch {
            let mut file_state = ProcessingState::new();
            let (headers, records) = self.read_file(file)?;
            let header_slots = resolve_headers(&file.name, headers, &mut file_state);
            for column in header_slots.iter().flatten() {
                if !columns.contains(column) {
                    columns.push(column.clone());
                }
            }

            let mut ragged = false;
            for record in records {
                if record.iter().all(|cell| cell.trim().is_empty()) {
                    continue;
                }
                if record.len() > header_slots.len() {
                    ragged = true;
                }
                let row: Row = header_slots
                    .iter()
                    .enumerate()
                    .filter_map(|(i, slot)| {
                        slot.as_ref().map(|column| {
                            let value = record.get(i).map(|v| v.trim()).unwrap_or("");
                            (column.clone(), Value::String(value.to_string()))
                        })
                    })
                    .collect();
                rows.push(row);
            }
            if ragged {
                file_state.add_warning(
                    "Some rows have more cells than there are headers; extra cells were ignored",
                    Some(file.name.clone()),
                );
            }
            if file_state.has_warnings() {
                tracing::info!(
                    "{} produced {} warning(s)",
                    file.name,
                    file_state.get_warnings().len()
                );
            }
            state.merge(file_state);
        }

        if columns.is_empty() {
            return Err(ServiceError::Processing(
                "No columns were found in the uploaded files".into(),
            ));
        }

        let entity = self.choose_entity(&columns)?;
        let suggested_mapping = propose_mapping(entity, &columns);
        tracing::info!(
            "Matched {} of {} column(s) to entity '{}'",
            suggested_mapping.len(),
            columns.len(),
            entity.entity_type
        );

        let import_id = Uuid::new_v4();
        let analysis = AnalysisResult {
            import_id,
            entity_type: entity.entity_type.clone(),
            source_columns: columns,
            target_schema: entity.target_schema(),
            suggested_mapping,
            sample_data: rows.iter().take(self.config.sample_rows).cloned().collect(),
            total_rows: rows.len(),
            warnings: state.into_messages(),
        };

        self.imports()?.insert(
            import_id,
            ParsedBatch {
                entity_type: analysis.entity_type.clone(),
                rows,
            },
        );
        Ok(analysis)
    }

    async fn preview(
        &self,
        analysis: &AnalysisResult,
        mapping: &ColumnMapping,
        extra_params: &ExtraParams,
    ) -> Result<PreviewResult, ServiceError> {
        validate_mapping(analysis, mapping)?;
        let imports = self.imports()?;
        let parsed = imports
            .get(&analysis.import_id)
            .ok_or(ServiceError::UnknownImport(analysis.import_id))?;
        tracing::info!(
            "Previewing import {} ({} rows)",
            analysis.import_id,
            parsed.rows.len()
        );

        let rows = parsed
            .rows
            .iter()
            .filter_map(|row| transform_row(row, &analysis.target_schema, mapping, extra_params))
            .take(self.config.preview_rows)
            .collect();

        let mut warnings = Vec::new();
        for (target, columns) in MappingEditor::duplicate_targets(mapping) {
            warnings.push(format!(
                "Field '{}' is mapped from several columns ({}); the first non-empty value is used",
                target,
                columns.join(", ")
            ));
        }
        let unmapped = MappingEditor::unmapped_columns(mapping);
        if !unmapped.is_empty() {
            warnings.push(format!(
                "{} column(s) will not be imported: {}",
                unmapped.len(),
                unmapped.join(", ")
            ));
        }

        Ok(PreviewResult {
            import_id: analysis.import_id,
            columns: effective_columns(&analysis.target_schema, mapping, extra_params),
            rows,
            total_rows: parsed.rows.len(),
            warnings,
        })
    }

    async fn commit(
        &self,
        analysis: &AnalysisResult,
        mapping: &ColumnMapping,
        extra_params: &ExtraParams,
    ) -> Result<CommitResult, ServiceError> {
        validate_mapping(analysis, mapping)?;
        let (entity_type, records, skipped_rows) = {
            let imports = self.imports()?;
            let parsed = imports
                .get(&analysis.import_id)
                .ok_or(ServiceError::UnknownImport(analysis.import_id))?;
            let records: Vec<Row> = parsed
                .rows
                .iter()
                .filter_map(|row| {
                    transform_row(row, &analysis.target_schema, mapping, extra_params)
                })
                .collect();
            let skipped = parsed.rows.len() - records.len();
            (parsed.entity_type.clone(), records, skipped)
        };

        let output = match &self.config.output_dir {
            Some(dir) => {
                fs::create_dir_all(dir)?;
                let path = dir.join(format!("{}-{}.json", entity_type, analysis.import_id));
                let mut writer = BufWriter::new(File::create(&path)?);
                serde_json::to_writer_pretty(&mut writer, &records)?;
                writer.flush()?;
                tracing::info!("Wrote {} record(s) to {}", records.len(), path.display());
                Some(path)
            }
            None => None,
        };

        self.imports()?.remove(&analysis.import_id);
        if skipped_rows > 0 {
            tracing::warn!("Skipped {} row(s) with no mapped values", skipped_rows);
        }

        Ok(CommitResult {
            import_id: analysis.import_id,
            entity_type,
            imported_rows: records.len(),
            skipped_rows,
            output,
            committed_at: Utc::now(),
        })
    }

    async fn discard(&self, import_id: Uuid) {
        match self.imports() {
            Ok(mut imports) => {
                if imports.remove(&import_id).is_some() {
                    tracing::debug!("Dropped cached rows for import {}", import_id);
                }
            }
            Err(e) => tracing::warn!("Could not discard import {}: {}", import_id, e),
        }
    }
}

fn read_delimited(
    path: &Path,
    delimiter: u8,
) -> Result<(Vec<String>, Vec<Vec<String>>), ServiceError> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .from_path(path)?;
    let headers = reader.headers()?.iter().map(String::from).collect();
    let mut rows = Vec::new();
    for record in reader.records() {
        rows.push(record?.iter().map(String::from).collect());
    }
    Ok((headers, rows))
}

/// Pick the delimiter of a plain-text export from its header line.
fn sniff_delimiter(path: &Path) -> Result<u8, ServiceError> {
    let mut line = String::new();
    BufReader::new(File::open(path)?).read_line(&mut line)?;
    let delimiter = if line.contains('\t') {
        b'\t'
    } else if line.contains(';') && !line.contains(',') {
        b';'
    } else if line.contains('|') && !line.contains(',') {
        b'|'
    } else {
        b','
    };
    Ok(delimiter)
}

/// Column name per cell position; `None` for cells that are ignored.
fn resolve_headers(
    file_name: &str,
    headers: Vec<String>,
    state: &mut ProcessingState,
) -> Vec<Option<String>> {
    let mut seen = HashSet::new();
    headers
        .into_iter()
        .enumerate()
        .map(|(i, header)| {
            let header = header.trim().to_string();
            if header.is_empty() {
                state.add_warning(
                    format!("Column {} has an empty header and was ignored", i + 1),
                    Some(file_name.to_string()),
                );
                None
            } else if !seen.insert(header.clone()) {
                state.add_warning(
                    format!("Duplicate header '{}' in column {} was ignored", header, i + 1),
                    Some(file_name.to_string()),
                );
                None
            } else {
                Some(header)
            }
        })
        .collect()
}

fn field_matches(field: &FieldDefinition, normalized_column: &str) -> bool {
    normalize_column_name(&field.id) == normalized_column
        || (!field.description.is_empty()
            && normalize_column_name(&field.description) == normalized_column)
        || field
            .aliases
            .iter()
            .any(|alias| normalize_column_name(alias) == normalized_column)
}

/// Propose a target for each column whose name matches a field id, description
/// or alias. Each field is proposed at most once.
fn propose_mapping(entity: &EntityDefinition, columns: &[String]) -> IndexMap<String, String> {
    let mut taken = HashSet::new();
    let mut proposal = IndexMap::new();
    for column in columns {
        let normalized = normalize_column_name(column);
        if let Some(field) = entity
            .fields
            .iter()
            .find(|f| !taken.contains(&f.id) && field_matches(f, &normalized))
        {
            taken.insert(field.id.clone());
            proposal.insert(column.clone(), field.id.clone());
        }
    }
    proposal
}

fn validate_mapping(analysis: &AnalysisResult, mapping: &ColumnMapping) -> Result<(), ServiceError> {
    if mapping.mapped_count() == 0 {
        return Err(ServiceError::InvalidMapping("No columns are mapped".into()));
    }
    for (column, target) in mapping.mapped() {
        if !analysis.source_columns.iter().any(|c| c == column) {
            return Err(ServiceError::InvalidMapping(format!(
                "Column '{}' is not part of the analysed files",
                column
            )));
        }
        if !analysis.target_schema.contains_key(target) {
            return Err(ServiceError::InvalidMapping(format!(
                "Column '{}' is mapped to unknown field '{}'",
                column, target
            )));
        }
    }
    Ok(())
}

fn effective_columns(
    schema: &TargetSchema,
    mapping: &ColumnMapping,
    extra_params: &ExtraParams,
) -> Vec<String> {
    let mut columns: Vec<String> = schema
        .keys()
        .filter(|field| mapping.mapped().any(|(_, target)| target == field.as_str()))
        .cloned()
        .collect();
    for key in extra_params.keys() {
        if !columns.contains(key) {
            columns.push(key.clone());
        }
    }
    columns
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

/// Re-key a source row by target field, in schema order. Returns `None` when
/// every mapped value is empty. Extra params apply to every row and take
/// precedence over mapped values.
fn transform_row(
    row: &Row,
    schema: &TargetSchema,
    mapping: &ColumnMapping,
    extra_params: &ExtraParams,
) -> Option<Row> {
    let mut out = Row::new();
    let mut has_value = false;
    for field in schema.keys() {
        let mut sources = mapping
            .mapped()
            .filter(|(_, target)| *target == field.as_str())
            .map(|(column, _)| row.get(column).cloned().unwrap_or(Value::Null))
            .peekable();
        if sources.peek().is_none() {
            continue;
        }
        let values: Vec<Value> = sources.collect();
        let value = values
            .iter()
            .find(|v| !is_blank(v))
            .cloned()
            .unwrap_or_else(|| values[0].clone());
        has_value |= !is_blank(&value);
        out.insert(field.clone(), value);
    }
    if !has_value {
        return None;
    }
    for (key, value) in extra_params {
        out.insert(key.clone(), value.clone());
    }
    Some(out)
}
