//! Pipeline configuration
//!
//! The default pipeline is the four-stage chain
//! `acquire -> enrich -> load -> transform`, with each command taken from the
//! environment. A TOML pipeline file replaces the chain entirely:
//!
//! ```toml
//! [[stage]]
//! name = "acquire"
//! program = "python"
//! args = ["src/scrape.py"]
//!
//! [[stage]]
//! name = "load"
//! program = "tgdp-ingest"
//! args = ["all"]
//! after = ["acquire"]
//! ```

use serde::Deserialize;
use std::path::{Path, PathBuf};
use tgdp_common::{env, Result, TgdpError};

use crate::stage::StageSpec;

pub const DEFAULT_ACQUIRE_CMD: &str = "python src/scrape.py";
pub const DEFAULT_ENRICH_CMD: &str = "python src/yolo_detector.py";
pub const DEFAULT_LOAD_CMD: &str = "tgdp-ingest all";
pub const DEFAULT_DBT_BIN: &str = "dbt";
pub const DEFAULT_DBT_PROJECT_DIR: &str = "./telegram_dbt_project";
pub const DEFAULT_DBT_PROFILES_DIR: &str = ".";

/// Stage names of the default chain, in order
pub const DEFAULT_STAGES: [&str; 4] = ["acquire", "enrich", "load", "transform"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    pub acquire_cmd: String,
    pub enrich_cmd: String,
    pub load_cmd: String,
    pub dbt_bin: String,
    pub dbt_project_dir: PathBuf,
    pub dbt_profiles_dir: PathBuf,
    /// Working directory for every stage; relative `requires` paths resolve here
    pub workdir: Option<PathBuf>,
    pub stage_timeout_secs: Option<u64>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            acquire_cmd: DEFAULT_ACQUIRE_CMD.to_string(),
            enrich_cmd: DEFAULT_ENRICH_CMD.to_string(),
            load_cmd: DEFAULT_LOAD_CMD.to_string(),
            dbt_bin: DEFAULT_DBT_BIN.to_string(),
            dbt_project_dir: PathBuf::from(DEFAULT_DBT_PROJECT_DIR),
            dbt_profiles_dir: PathBuf::from(DEFAULT_DBT_PROFILES_DIR),
            workdir: None,
            stage_timeout_secs: None,
        }
    }
}

impl PipelineConfig {
    /// Load from `TGDP_ACQUIRE_CMD`, `TGDP_ENRICH_CMD`, `TGDP_LOAD_CMD`,
    /// `DBT_BIN`, `DBT_PROJECT_DIR`, `DBT_PROFILES_DIR`, `TGDP_WORKDIR` and
    /// `TGDP_STAGE_TIMEOUT_SECS`.
    pub fn from_env() -> Result<Self> {
        let config = Self {
            acquire_cmd: env::var_or("TGDP_ACQUIRE_CMD", DEFAULT_ACQUIRE_CMD),
            enrich_cmd: env::var_or("TGDP_ENRICH_CMD", DEFAULT_ENRICH_CMD),
            load_cmd: env::var_or("TGDP_LOAD_CMD", DEFAULT_LOAD_CMD),
            dbt_bin: env::var_or("DBT_BIN", DEFAULT_DBT_BIN),
            dbt_project_dir: PathBuf::from(env::var_or("DBT_PROJECT_DIR", DEFAULT_DBT_PROJECT_DIR)),
            dbt_profiles_dir: PathBuf::from(env::var_or("DBT_PROFILES_DIR", DEFAULT_DBT_PROFILES_DIR)),
            workdir: env::var("TGDP_WORKDIR").map(PathBuf::from),
            stage_timeout_secs: env::parse_opt("TGDP_STAGE_TIMEOUT_SECS")?,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("TGDP_ACQUIRE_CMD", &self.acquire_cmd),
            ("TGDP_ENRICH_CMD", &self.enrich_cmd),
            ("TGDP_LOAD_CMD", &self.load_cmd),
            ("DBT_BIN", &self.dbt_bin),
        ] {
            if value.trim().is_empty() {
                return Err(TgdpError::config(format!("{} must not be empty", name)));
            }
        }
        if self.stage_timeout_secs == Some(0) {
            return Err(TgdpError::config("TGDP_STAGE_TIMEOUT_SECS must be greater than 0"));
        }
        Ok(())
    }

    /// The four-stage chain
    pub fn default_stages(&self) -> Vec<StageSpec> {
        let [acquire, enrich, load, transform] = DEFAULT_STAGES;

        let transform_stage = StageSpec::new(transform, &self.dbt_bin)
            .args(["build".to_string(), "--project-dir".to_string(), self.dbt_project_dir.display().to_string()])
            .env("DBT_PROFILES_DIR", self.dbt_profiles_dir.display().to_string())
            .requires(self.resolve(&self.dbt_project_dir))
            .after(load);

        vec![
            command_stage(acquire, &self.acquire_cmd),
            command_stage(enrich, &self.enrich_cmd).after(acquire),
            command_stage(load, &self.load_cmd).after(enrich),
            transform_stage,
        ]
    }

    /// Read stages from a TOML pipeline file. Relative `requires` paths are
    /// resolved against the working directory.
    pub fn load_stages(&self, path: &Path) -> Result<Vec<StageSpec>> {
        let raw = std::fs::read_to_string(path)?;
        let mut stages = parse_pipeline_file(&raw)
            .map_err(|e| TgdpError::config(format!("{}: {}", path.display(), e)))?;

        for stage in &mut stages {
            stage.requires = stage.requires.iter().map(|p| self.resolve(p)).collect();
        }

        Ok(stages)
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        match &self.workdir {
            Some(dir) if path.is_relative() => dir.join(path),
            _ => path.to_path_buf(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct PipelineFile {
    #[serde(rename = "stage", default)]
    stages: Vec<StageSpec>,
}

/// Parse the `[[stage]]` tables of a pipeline file.
pub fn parse_pipeline_file(raw: &str) -> std::result::Result<Vec<StageSpec>, toml::de::Error> {
    toml::from_str::<PipelineFile>(raw).map(|file| file.stages)
}

// Commands are split on whitespace; quoting is not interpreted. Use a pipeline
// file for arguments containing spaces.
fn command_stage(name: &str, command: &str) -> StageSpec {
    let mut parts = command.split_whitespace();
    let program = parts.next().unwrap_or_default();
    StageSpec::new(name, program).args(parts)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serial_test::serial;

    const VARS: &[&str] = &[
        "TGDP_ACQUIRE_CMD",
        "TGDP_ENRICH_CMD",
        "TGDP_LOAD_CMD",
        "DBT_BIN",
        "DBT_PROJECT_DIR",
        "DBT_PROFILES_DIR",
        "TGDP_WORKDIR",
        "TGDP_STAGE_TIMEOUT_SECS",
    ];

    fn clear_vars() {
        for var in VARS {
            std::env::remove_var(var);
        }
    }

    #[test]
    #[serial]
    fn test_defaults_from_empty_env() {
        clear_vars();
        assert_eq!(PipelineConfig::from_env().unwrap(), PipelineConfig::default());
    }

    #[test]
    #[serial]
    fn test_env_overrides() {
        clear_vars();
        std::env::set_var("TGDP_LOAD_CMD", "/opt/tgdp/bin/tgdp-ingest --strict all");
        std::env::set_var("TGDP_STAGE_TIMEOUT_SECS", "3600");
        std::env::set_var("TGDP_WORKDIR", "/srv/tgdp");

        let config = PipelineConfig::from_env().unwrap();
        assert_eq!(config.stage_timeout_secs, Some(3600));

        let stages = config.default_stages();
        assert_eq!(stages[2].program, "/opt/tgdp/bin/tgdp-ingest");
        assert_eq!(stages[2].args, vec!["--strict", "all"]);
        assert_eq!(
            stages[3].requires,
            vec![PathBuf::from("/srv/tgdp/./telegram_dbt_project")]
        );

        clear_vars();
    }

    #[test]
    #[serial]
    fn test_rejects_empty_command_and_zero_timeout() {
        clear_vars();
        std::env::set_var("TGDP_STAGE_TIMEOUT_SECS", "0");
        assert!(PipelineConfig::from_env().is_err());
        clear_vars();

        let config = PipelineConfig {
            enrich_cmd: "   ".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_default_chain() {
        let stages = PipelineConfig::default().default_stages();
        let names: Vec<_> = stages.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, DEFAULT_STAGES);

        let transform = &stages[3];
        assert_eq!(transform.program, "dbt");
        assert_eq!(transform.args, vec!["build", "--project-dir", "./telegram_dbt_project"]);
        assert_eq!(transform.env.get("DBT_PROFILES_DIR").map(String::as_str), Some("."));
        assert_eq!(transform.after, vec!["load"]);
        assert_eq!(stages[0].after, Vec::<String>::new());
        assert_eq!(stages[0].command_line(), "python src/scrape.py");
    }

    #[test]
    fn test_parse_pipeline_file() {
        let stages = parse_pipeline_file(
            r#"
            [[stage]]
            name = "acquire"
            program = "python"
            args = ["src/scrape.py"]

            [[stage]]
            name = "transform"
            program = "dbt"
            args = ["build"]
            after = ["acquire"]
            requires = ["telegram_dbt_project"]
            timeout_secs = 900

            [stage.env]
            DBT_PROFILES_DIR = "."
            "#,
        )
        .unwrap();

        assert_eq!(stages.len(), 2);
        assert_eq!(stages[1].after, vec!["acquire"]);
        assert_eq!(stages[1].timeout_secs, Some(900));
        assert_eq!(stages[1].env.get("DBT_PROFILES_DIR").map(String::as_str), Some("."));
    }

    #[test]
    fn test_load_stages_resolves_requires() {
        let dir = tempfile::TempDir::new().unwrap();
        let file = dir.path().join("pipeline.toml");
        std::fs::write(
            &file,
            "[[stage]]\nname = \"transform\"\nprogram = \"dbt\"\nrequires = [\"project\"]\n",
        )
        .unwrap();

        let config = PipelineConfig {
            workdir: Some(dir.path().to_path_buf()),
            ..Default::default()
        };
        let stages = config.load_stages(&file).unwrap();
        assert_eq!(stages[0].requires, vec![dir.path().join("project")]);
    }

    #[test]
    fn test_pipeline_file_rejects_unknown_keys() {
        assert!(parse_pipeline_file("[[stages]]\nname = \"a\"\nprogram = \"b\"\n").is_err());
    }
}
