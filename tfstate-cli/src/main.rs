use std::fs;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use colored::Colorize;
use similar::{ChangeTag, TextDiff};

use tfstate::{Backend, BackendConfig, DEFAULT_WORKSPACE, StateBackend, StateFile, create_backend};

#[derive(Parser)]
#[command(name = "tfstate")]
#[command(about = "Read and persist infrastructure state", long_about = None)]
struct Cli {
    /// Path to the backend configuration file
    #[arg(long, short, global = true, default_value = "backend.toml")]
    config: PathBuf,

    /// Workspace to operate on
    #[arg(long, short, global = true)]
    workspace: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the stored state
    Show,
    /// Replace the stored state with the contents of a state file
    Push {
        /// State file to push
        file: PathBuf,

        /// Show diff against the stored state before pushing
        #[arg(long)]
        diff: bool,

        /// Push even if the file's lineage differs from the stored state
        #[arg(long)]
        force: bool,
    },
    /// Release a lock left behind by an interrupted persist
    Unlock {
        /// ID of the lock to release
        lock_id: String,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();
    let workspace = cli.workspace.as_deref();

    let result = match cli.command {
        Commands::Show => run_show(&cli.config, workspace).await,
        Commands::Push { file, diff, force } => {
            run_push(&cli.config, workspace, &file, diff, force).await
        }
        Commands::Unlock { lock_id } => run_unlock(&cli.config, workspace, &lock_id).await,
    };

    if let Err(e) = result {
        eprintln!("{} {}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

async fn load_backend(config_path: &Path) -> Result<Backend, String> {
    let config = BackendConfig::from_file(config_path).map_err(|e| e.to_string())?;
    create_backend(&config).await.map_err(|e| e.to_string())
}

fn workspace_args(workspace: Option<&str>) -> Vec<&str> {
    workspace.into_iter().collect()
}

fn to_pretty_json(state: &StateFile) -> Result<String, String> {
    serde_json::to_string_pretty(state).map_err(|e| format!("Failed to encode state: {}", e))
}

async fn run_show(config_path: &Path, workspace: Option<&str>) -> Result<(), String> {
    let mut backend = load_backend(config_path).await?;
    let state = backend
        .read(&workspace_args(workspace))
        .await
        .map_err(|e| e.to_string())?;

    if state.is_initial() {
        println!("{}", "No state stored yet.".yellow());
        return Ok(());
    }

    println!("{}", to_pretty_json(&state)?);
    Ok(())
}

async fn run_push(
    config_path: &Path,
    workspace: Option<&str>,
    file: &Path,
    show_diff: bool,
    force: bool,
) -> Result<(), String> {
    let content = fs::read_to_string(file)
        .map_err(|e| format!("Failed to read {}: {}", file.display(), e))?;
    let new_state: StateFile = serde_json::from_str(&content)
        .map_err(|e| format!("Failed to parse {}: {}", file.display(), e))?;

    let mut backend = load_backend(config_path).await?;
    let current = backend
        .read(&workspace_args(workspace))
        .await
        .map_err(|e| e.to_string())?;

    if show_diff {
        print_diff(file, &to_pretty_json(&current)?, &to_pretty_json(&new_state)?);
    }

    let serial = new_state.serial;
    if force {
        backend.force_write(new_state)
    } else {
        backend.write(new_state)
    }
    .map_err(|e| e.to_string())?;
    backend.persist().await.map_err(|e| e.to_string())?;

    println!(
        "{}",
        format!(
            "✓ State pushed to workspace {} (serial {}).",
            backend.workspace().unwrap_or(DEFAULT_WORKSPACE),
            serial
        )
        .green()
        .bold()
    );
    Ok(())
}

async fn run_unlock(
    config_path: &Path,
    workspace: Option<&str>,
    lock_id: &str,
) -> Result<(), String> {
    let backend = load_backend(config_path).await?;
    let workspace = workspace.unwrap_or(DEFAULT_WORKSPACE);

    match backend {
        Backend::S3(s3) => s3
            .force_unlock(workspace, lock_id)
            .await
            .map_err(|e| e.to_string())?,
        Backend::Local(_) => return Err("The local backend does not use locks".to_string()),
    }

    println!("{}", format!("✓ Lock {} released.", lock_id).green().bold());
    Ok(())
}

fn print_diff(file: &Path, stored: &str, pushed: &str) {
    println!("\n{} {}:", "Diff for".cyan().bold(), file.display());

    let diff = TextDiff::from_lines(stored, pushed);
    for change in diff.iter_all_changes() {
        let sign = match change.tag() {
            ChangeTag::Delete => "-".red(),
            ChangeTag::Insert => "+".green(),
            ChangeTag::Equal => " ".normal(),
        };
        print!("{}{}", sign, change);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_local_config(dir: &Path, state_path: &Path) -> PathBuf {
        let config_path = dir.join("backend.toml");
        fs::write(
            &config_path,
            format!("backend = \"local\"\npath = {:?}\n", state_path.display().to_string()),
        )
        .unwrap();
        config_path
    }

    #[test]
    fn test_workspace_args() {
        assert!(workspace_args(None).is_empty());
        assert_eq!(workspace_args(Some("prod")), vec!["prod"]);
    }

    #[tokio::test]
    async fn test_push_then_show() {
        let dir = tempfile::tempdir().unwrap();
        let state_path = dir.path().join("terraform.tfstate");
        let config_path = write_local_config(dir.path(), &state_path);

        let pushed = StateFile::new().with_field("outputs", serde_json::json!({"id": "x"}));
        let input = dir.path().join("input.tfstate");
        fs::write(&input, serde_json::to_string(&pushed).unwrap()).unwrap();

        run_push(&config_path, None, &input, false, false)
            .await
            .unwrap();
        run_show(&config_path, None).await.unwrap();

        let stored: StateFile = serde_json::from_slice(&fs::read(&state_path).unwrap()).unwrap();
        assert_eq!(stored, pushed);
    }

    #[tokio::test]
    async fn test_push_foreign_lineage_needs_force() {
        let dir = tempfile::tempdir().unwrap();
        let state_path = dir.path().join("terraform.tfstate");
        let config_path = write_local_config(dir.path(), &state_path);
        fs::write(
            &state_path,
            serde_json::to_string(&StateFile::with_lineage("stored")).unwrap(),
        )
        .unwrap();

        let pushed = StateFile::with_lineage("other");
        let input = dir.path().join("input.tfstate");
        fs::write(&input, serde_json::to_string(&pushed).unwrap()).unwrap();

        let err = run_push(&config_path, None, &input, false, false)
            .await
            .unwrap_err();
        assert!(err.contains("lineage mismatch"));

        run_push(&config_path, None, &input, false, true)
            .await
            .unwrap();
        let stored: StateFile = serde_json::from_slice(&fs::read(&state_path).unwrap()).unwrap();
        assert_eq!(stored.lineage, "other");
    }

    #[tokio::test]
    async fn test_unlock_rejects_local_backend() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = write_local_config(dir.path(), &dir.path().join("x.tfstate"));

        let err = run_unlock(&config_path, None, "abc").await.unwrap_err();
        assert!(err.contains("does not use locks"));
    }

    #[tokio::test]
    async fn test_missing_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = run_show(&dir.path().join("nope.toml"), None).await.unwrap_err();
        assert!(err.contains("Failed to read"));
    }
}
