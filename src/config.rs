use crate::settings::HashTreeSettings;
use figment::Figment;
use figment::providers::Env;

/// Environment variable prefix. Nested settings are separated by a double underscore,
/// e.g. `IDC_HASHTREE_REHASH__WORKERS=8`.
pub const ENV_PREFIX: &str = "IDC_HASHTREE_";

pub fn figment() -> Figment {
    Figment::new().merge(Env::prefixed(ENV_PREFIX).split("__"))
}

/// Read the settings from the environment. Meant to be called once, at startup.
pub fn load_settings() -> Result<HashTreeSettings, figment::Error> {
    figment().extract()
}
