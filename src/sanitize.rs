use regex::Regex;
use std::sync::OnceLock;

/// Derive the IDC collection ID from a source collection ID: lowercase, with every run
/// of characters other than ASCII letters and digits replaced by a single "_".
///
/// e.g. `TCGA-BRCA` becomes `tcga_brca`.
pub fn idc_collection_id<S: AsRef<str>>(collection_id: S) -> String {
    let lower = collection_id.as_ref().replace('\0', "").to_lowercase();
    INVALID_CHARS_RE
        .get_or_init(|| Regex::new(r#"[^a-z0-9]+"#).unwrap())
        .replace_all(&lower, "_")
        .to_string()
}

static INVALID_CHARS_RE: OnceLock<Regex> = OnceLock::new();
