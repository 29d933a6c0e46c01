pub mod categorizer;
pub mod csv;
pub mod rules;

pub use categorizer::{CategorizeOptions, CategorizeSummary, Categorizer, TagPolicy};
pub use csv::{CsvError, CsvImportProfile};
pub use rules::{Rule, RuleDatabase, RuleFile, RuleLoadError, RuleMatch};

pub mod import {
    use std::path::Path;

    use tcat_core::RecordCollection;

    use crate::{CategorizeOptions, Categorizer, CsvError, CsvImportProfile, RuleDatabase, RuleLoadError};

    pub fn import_csv_path(
        path: &Path,
        profile: &CsvImportProfile,
    ) -> Result<RecordCollection, CsvError> {
        crate::csv::import_path(path, profile)
    }

    pub fn load_rules(path: &Path) -> Result<RuleDatabase, RuleLoadError> {
        RuleDatabase::load(path)
    }

    pub fn create_categorizer(database: RuleDatabase, options: CategorizeOptions) -> Categorizer {
        Categorizer::new(database, options)
    }
}
