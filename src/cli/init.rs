//! taskflow init: create the data directory and a default configuration.

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::config::{self, Config, CONFIG_FILE};
use crate::error::{Error, Result};
use crate::output::{emit_success, HumanOutput, OutputOptions};

pub struct InitOptions {
    pub dir: Option<PathBuf>,
    pub json: bool,
    pub quiet: bool,
}

#[derive(Serialize)]
struct InitReport {
    dir: PathBuf,
    created_dir: bool,
    created_config: bool,
}

pub fn run(options: InitOptions) -> Result<()> {
    let dir = config::resolve_data_dir(options.dir)?;
    let created_dir = !dir.exists();
    std::fs::create_dir_all(&dir)?;
    let created_config = ensure_config(&dir)?;

    let report = InitReport {
        dir: dir.clone(),
        created_dir,
        created_config,
    };

    let header = if created_dir || created_config {
        "taskflow init: initialized data directory"
    } else {
        "taskflow init: nothing to do"
    };
    let mut human = HumanOutput::new(header);
    human.push_summary("Directory", dir.display().to_string());
    human.push_summary(
        "Created",
        match (created_dir, created_config) {
            (true, true) => format!("{}/, {CONFIG_FILE}", dir.display()),
            (true, false) => format!("{}/", dir.display()),
            (false, true) => CONFIG_FILE.to_string(),
            (false, false) => "none".to_string(),
        },
    );
    human.push_next_step("taskflow add \"<title>\"");

    emit_success(
        OutputOptions {
            json: options.json,
            quiet: options.quiet,
        },
        "init",
        &report,
        Some(&human),
    )
}

fn ensure_config(dir: &Path) -> Result<bool> {
    let config_path = dir.join(CONFIG_FILE);
    if config_path.exists() {
        if !config_path.is_file() {
            return Err(Error::InvalidConfig(format!(
                "{CONFIG_FILE} exists but is not a file: {}",
                config_path.display()
            )));
        }
        return Ok(false);
    }

    Config::default().save(&config_path)?;
    Ok(true)
}
