use config::{builder::DefaultState, Config, ConfigBuilder, ConfigError, Environment, File as ConfigFile};
use serde::Deserialize;
use std::path::{Path, PathBuf};

pub const DEFAULT_DATA_ROOT: &str = "/mnt/storage_vol01/ida";
pub const DEFAULT_DATABASE_PATH: &str = "ida.db";
pub const DEFAULT_PROJECT_USER_PREFIX: &str = "PSO_";
pub const DEFAULT_STAGING_FOLDER_SUFFIX: &str = "+";
pub const DEFAULT_MIGRATION_EPOCH: &str = "2023-03-01T00:00:00Z";

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Root of the project homes and of the `control/` directory.
    pub data_root: PathBuf,
    pub database_path: String,
    /// Prefix of the pseudo-user account that owns each project's storage.
    pub project_user_prefix: String,
    /// Suffix distinguishing a project's staging folder from its frozen folder.
    pub staging_folder_suffix: String,
    /// Anchor reported for projects whose history predates the change log.
    pub migration_epoch: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_root: PathBuf::from(DEFAULT_DATA_ROOT),
            database_path: DEFAULT_DATABASE_PATH.to_string(),
            project_user_prefix: DEFAULT_PROJECT_USER_PREFIX.to_string(),
            staging_folder_suffix: DEFAULT_STAGING_FOLDER_SUFFIX.to_string(),
            migration_epoch: DEFAULT_MIGRATION_EPOCH.to_string(),
        }
    }
}

impl AppConfig {
    /// Pseudo-user account owning the project's storage, e.g. `PSO_2017_1234`.
    pub fn project_user(&self, project: &str) -> String {
        format!("{}{}", self.project_user_prefix, project)
    }

    pub fn is_project_user(&self, user: &str) -> bool {
        user.starts_with(&self.project_user_prefix)
    }

    /// Home directory of the project's pseudo-user.
    pub fn project_home(&self, project: &str) -> PathBuf {
        self.data_root.join(self.project_user(project))
    }

    pub fn control_dir(&self) -> PathBuf {
        self.data_root.join("control")
    }

    /// Pathname of the staging folder as seen from the project's files root, e.g. `/2017_1234+`.
    pub fn staging_root(&self, project: &str) -> String {
        format!("/{}{}", project, self.staging_folder_suffix)
    }

    /// Pathname of the frozen folder as seen from the project's files root.
    pub fn frozen_root(&self, project: &str) -> String {
        format!("/{}", project)
    }
}

fn with_defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    Config::builder()
        .set_default("data_root", DEFAULT_DATA_ROOT)?
        .set_default("database_path", DEFAULT_DATABASE_PATH)?
        .set_default("project_user_prefix", DEFAULT_PROJECT_USER_PREFIX)?
        .set_default("staging_folder_suffix", DEFAULT_STAGING_FOLDER_SUFFIX)?
        .set_default("migration_epoch", DEFAULT_MIGRATION_EPOCH)
}

/// Load `Config.toml` from the working directory if present, then `IDA_*` variables.
pub fn load_configuration() -> Result<AppConfig, ConfigError> {
    let builder = with_defaults()?
        .add_source(ConfigFile::with_name("Config").required(false))
        .add_source(Environment::with_prefix("IDA"))
        .build()?;
    builder.try_deserialize::<AppConfig>()
}

/// Load configuration from an explicit file, without consulting the environment.
pub fn load_from_file(path: &Path) -> Result<AppConfig, ConfigError> {
    let builder = with_defaults()?
        .add_source(ConfigFile::from(path).required(true))
        .build()?;
    builder.try_deserialize::<AppConfig>()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_load_from_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ida.toml");
        fs::write(
            &path,
            "data_root = \"/srv/ida\"\nproject_user_prefix = \"PROJ_\"\n",
        )
        .unwrap();

        let config = load_from_file(&path).unwrap();
        assert_eq!(config.data_root, PathBuf::from("/srv/ida"));
        assert_eq!(config.project_user_prefix, "PROJ_");
        assert_eq!(config.staging_folder_suffix, "+");
        assert_eq!(config.migration_epoch, DEFAULT_MIGRATION_EPOCH);
    }

    #[test]
    fn test_project_paths() {
        let config = AppConfig {
            data_root: PathBuf::from("/data"),
            ..AppConfig::default()
        };
        assert_eq!(config.project_user("2017_1234"), "PSO_2017_1234");
        assert_eq!(config.project_home("2017_1234"), PathBuf::from("/data/PSO_2017_1234"));
        assert_eq!(config.staging_root("2017_1234"), "/2017_1234+");
        assert_eq!(config.frozen_root("2017_1234"), "/2017_1234");
        assert!(config.is_project_user("PSO_2017_1234"));
        assert!(!config.is_project_user("alice"));
    }
}
