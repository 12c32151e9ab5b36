#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Template {
    Basic,
    Full,
}

impl Template {
    pub fn contents(&self) -> &'static str {
        match self {
            Template::Basic => BASIC_CONFIG,
            Template::Full => FULL_CONFIG,
        }
    }
}

pub const BASIC_CONFIG: &str = r#"{
  // Target record kinds that imported files can be mapped onto
  "entities": [
    {
      "entity_type": "employee",
      // Fields in display order; column headers matching an id, description
      // or alias are proposed automatically
      "fields": [
        { "id": "full_name", "description": "Full name", "aliases": ["Name", "Employee"] },
        { "id": "department", "description": "Department", "aliases": ["Dept"] },
        { "id": "email", "description": "Work email", "aliases": ["E-mail"] }
      ]
    }
  ],

  // Directory that committed imports are written to (optional)
  "output_dir": "imports/"
}"#;

pub const FULL_CONFIG: &str = r#"{
  // File admission rules, checked before anything is uploaded
  "intake": {
    // Maximum number of files in one batch
    "max_files": 20,
    // Maximum size of a single file, in bytes (10 MiB)
    "max_file_size": 10485760,
    // Accepted extensions, compared case-insensitively
    "allowed_extensions": ["csv", "xlsx", "xls", "txt"]
  },

  // Wizard steps, in order. "upload", "map", "preview" and "commit" are
  // required, in that relative order, and "commit" must be last.
  // "analyze" is optional; other keys are plain steps with no server call.
  "steps": [
    { "key": "upload", "label": "Upload" },
    { "key": "analyze", "label": "Analyze" },
    { "key": "map", "label": "Map Columns" },
    { "key": "preview", "label": "Preview" },
    { "key": "commit", "label": "Import" }
  ],

  // "allow" lets two columns feed the same field; "reject" refuses the
  // second assignment
  "duplicate_targets": "allow",

  "entities": [
    {
      "entity_type": "employee",
      "fields": [
        { "id": "employee_id", "description": "Employee number", "aliases": ["Emp No", "ID"] },
        { "id": "full_name", "description": "Full name", "aliases": ["Name", "Employee"] },
        { "id": "department", "description": "Department", "aliases": ["Dept"] },
        { "id": "email", "description": "Work email", "aliases": ["E-mail"] },
        { "id": "hire_date", "description": "Hire date", "aliases": ["Start Date"] }
      ]
    },
    {
      "entity_type": "leave_balance",
      "fields": [
        { "id": "employee_id", "description": "Employee number", "aliases": ["Emp No", "ID"] },
        { "id": "leave_type", "description": "Leave type", "aliases": ["Type"] },
        { "id": "balance_days", "description": "Balance (days)", "aliases": ["Balance", "Days"] }
      ]
    }
  ],

  // Force a target entity instead of picking the best match (optional)
  // "entity_type": "employee",

  // Rows included with the analysis as sample data
  "sample_rows": 5,
  // Rows rendered by the preview step
  "preview_rows": 20,

  "output_dir": "imports/"
}
"#;
