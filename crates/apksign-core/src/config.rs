//! External tool configuration.
//!
//! Tool locations are resolved once into a [`ToolConfig`] and handed to the
//! backend, so nothing below this point reads process-wide state.

use std::path::{Path, PathBuf};

use crate::error::{ApksignError, Result};

/// Default per-invocation timeout for external tools.
pub const DEFAULT_TOOL_TIMEOUT_SECS: u64 = 600;

/// An external program plus any leading arguments (a runner prefix such as
/// `java -jar /path/apksigner.jar`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCommand {
    pub program: PathBuf,
    pub prefix_args: Vec<String>,
}

impl ToolCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            prefix_args: Vec::new(),
        }
    }

    /// Parses a whitespace-separated command line such as
    /// `java -jar /opt/sdk/lib/apksigner.jar`.
    pub fn parse(value: &str) -> Result<Self> {
        let mut parts = value.split_whitespace();
        let program = parts.next().ok_or_else(|| {
            ApksignError::Configuration("Tool command must not be empty".to_string())
        })?;
        Ok(Self {
            program: PathBuf::from(program),
            prefix_args: parts.map(str::to_string).collect(),
        })
    }

    /// Resolves the program to an absolute path, searching `PATH` for bare names.
    pub fn resolve(&self) -> Option<PathBuf> {
        if self.program.components().count() > 1 || self.program.is_absolute() {
            self.program.is_file().then(|| self.program.clone())
        } else {
            which::which(&self.program).ok()
        }
    }

    /// Whether the program can be found.
    pub fn is_available(&self) -> bool {
        self.resolve().is_some()
    }

    /// Short name used in logs and errors.
    pub fn name(&self) -> String {
        self.program
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.program.display().to_string())
    }

    /// Builds a process command with the prefix arguments applied.
    pub fn command(&self) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new(&self.program);
        cmd.args(&self.prefix_args);
        cmd
    }
}

impl std::fmt::Display for ToolCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.prefix_args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Locations of the signing tools and how to run them.
#[derive(Debug, Clone)]
pub struct ToolConfig {
    /// `apksigner` from the SDK build-tools.
    pub apksigner: ToolCommand,
    /// `zipalign` from the SDK build-tools.
    pub zipalign: ToolCommand,
    /// `keytool` from the JDK.
    pub keytool: ToolCommand,
    /// Maximum run time of one tool invocation, in seconds.
    pub timeout_secs: u64,
    /// Align in-process instead of running `zipalign`.
    pub native_align: bool,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            apksigner: ToolCommand::new(tool_file_name("apksigner")),
            zipalign: ToolCommand::new(tool_file_name("zipalign")),
            keytool: ToolCommand::new(tool_file_name("keytool")),
            timeout_secs: DEFAULT_TOOL_TIMEOUT_SECS,
            native_align: false,
        }
    }
}

impl ToolConfig {
    /// Uses `apksigner` and `zipalign` from the given build-tools directory.
    pub fn with_build_tools(dir: &Path) -> Self {
        Self {
            apksigner: ToolCommand::new(dir.join(tool_file_name("apksigner"))),
            zipalign: ToolCommand::new(dir.join(tool_file_name("zipalign"))),
            ..Self::default()
        }
    }

    /// Loads tool locations from the environment.
    ///
    /// Resolution order per tool:
    /// 1. `APKSIGN_APKSIGNER` / `APKSIGN_ZIPALIGN` / `APKSIGN_KEYTOOL`
    /// 2. `APKSIGN_BUILD_TOOLS`, or the newest `build-tools/<version>` under
    ///    `ANDROID_SDK_ROOT` / `ANDROID_HOME` (keytool: `JAVA_HOME/bin`)
    /// 3. The bare tool name, looked up on `PATH`
    pub fn from_env() -> Result<Self> {
        let mut config = match build_tools_from_env() {
            Some(dir) => {
                tracing::debug!("Using Android build-tools at {}", dir.display());
                Self::with_build_tools(&dir)
            }
            None => Self::default(),
        };

        if let Ok(java_home) = std::env::var("JAVA_HOME") {
            let keytool = Path::new(&java_home)
                .join("bin")
                .join(tool_file_name("keytool"));
            if keytool.is_file() {
                config.keytool = ToolCommand::new(keytool);
            }
        }

        if let Ok(val) = std::env::var("APKSIGN_APKSIGNER") {
            config.apksigner = ToolCommand::parse(&val)?;
        }

        if let Ok(val) = std::env::var("APKSIGN_ZIPALIGN") {
            config.zipalign = ToolCommand::parse(&val)?;
        }

        if let Ok(val) = std::env::var("APKSIGN_KEYTOOL") {
            config.keytool = ToolCommand::parse(&val)?;
        }

        if let Ok(val) = std::env::var("APKSIGN_TOOL_TIMEOUT_SECS") {
            config.timeout_secs = val.parse().map_err(|_| {
                ApksignError::Configuration(format!(
                    "APKSIGN_TOOL_TIMEOUT_SECS must be a number of seconds, got '{}'",
                    val
                ))
            })?;
        }

        if let Ok(val) = std::env::var("APKSIGN_NATIVE_ALIGN") {
            config.native_align = matches!(val.to_lowercase().as_str(), "1" | "true" | "yes");
        }

        Ok(config)
    }
}

/// Finds the build-tools directory from `APKSIGN_BUILD_TOOLS` or the SDK root.
fn build_tools_from_env() -> Option<PathBuf> {
    if let Ok(dir) = std::env::var("APKSIGN_BUILD_TOOLS") {
        return Some(PathBuf::from(dir));
    }

    let sdk = std::env::var("ANDROID_SDK_ROOT")
        .or_else(|_| std::env::var("ANDROID_HOME"))
        .ok()?;
    newest_build_tools(&Path::new(&sdk).join("build-tools"))
}

/// Picks the highest-versioned subdirectory of an SDK `build-tools` directory.
pub fn newest_build_tools(build_tools_dir: &Path) -> Option<PathBuf> {
    std::fs::read_dir(build_tools_dir)
        .ok()?
        .filter_map(|e| e.ok())
        .filter(|e| e.path().is_dir())
        .filter_map(|e| {
            let name = e.file_name().to_string_lossy().into_owned();
            version_key(&name).map(|key| (key, e.path()))
        })
        .max_by(|a, b| a.0.cmp(&b.0))
        .map(|(_, path)| path)
}

/// Numeric sort key for versions like `34.0.0` or `35.0.0-rc1`.
fn version_key(name: &str) -> Option<Vec<u32>> {
    let release = name.split('-').next()?;
    let key: Option<Vec<u32>> = release.split('.').map(|p| p.parse().ok()).collect();
    key.filter(|k| !k.is_empty())
}

fn tool_file_name(tool: &str) -> String {
    if cfg!(windows) {
        match tool {
            "apksigner" => "apksigner.bat".to_string(),
            other => format!("{}.exe", other),
        }
    } else {
        tool.to_string()
    }
}
