use crate::dispatch::execution::ScriptCommand;
use crate::dispatch::DispatcherConfig;
use clap::Parser;
use std::net::IpAddr;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Host to bind to
    #[arg(long, env = "VOLLEY_DETECT_HOST", default_value = "127.0.0.1")]
    pub host: IpAddr,

    /// Port to bind to
    #[arg(long, env = "VOLLEY_DETECT_PORT", default_value_t = 5000)]
    pub port: u16,

    /// Python interpreter used to run the detection script
    #[arg(long, env = "VOLLEY_DETECT_PYTHON", default_value = "python3")]
    pub python: PathBuf,

    /// Detection script
    #[arg(long, env = "VOLLEY_DETECT_SCRIPT", default_value = "detections.py")]
    pub script: PathBuf,

    /// Working directory for the detection script (model weights are resolved from here)
    #[arg(long, env = "VOLLEY_DETECT_SCRIPT_DIR")]
    pub script_dir: Option<PathBuf>,

    /// Maximum number of concurrently running jobs (unbounded if unset)
    #[arg(long, env = "VOLLEY_DETECT_MAX_JOBS")]
    pub max_jobs: Option<usize>,

    /// Number of finished jobs kept for status queries
    #[arg(long, env = "VOLLEY_DETECT_HISTORY", default_value_t = 128)]
    pub history: usize,
}

impl Args {
    pub fn parse_args() -> Self {
        Self::parse()
    }

    pub fn dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig {
            command: ScriptCommand {
                program: self.python.clone(),
                script: self.script.clone(),
                working_dir: self.script_dir.clone(),
            },
            max_jobs: self.max_jobs,
            history_limit: self.history,
        }
    }
}
