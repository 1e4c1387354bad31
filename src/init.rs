//! Project initialization
//!
//! `tunnelvision init` writes a commented `.tunnelvision/config.toml` and
//! keeps edit lock files out of git.

use crate::config::{CONFIG_FILE, LOCAL_DIR};
use colored::Colorize;
use std::fs;
use std::path::Path;

const GITIGNORE_ENTRY: &str = ".*.tvlock";

/// Project config template, embedded at compile time
const CONFIG_TEMPLATE: &str = r#"# tunnelvision project configuration
#
# Settings here override ~/.config/tunnelvision/config.toml.

# Circuit used for prompts without an @name prefix
default_circuit = "auto"

# When responses land in the buffer: "manual", "on-save" or "always"
accept_mode = "manual"

# Built-in tunnels: echo, claude (cli), ollama (local), api (hosted).
# Redefine one to change it, or add your own.

# [tunnels.claude]
# kind = "cli"
# command = "claude -p"
# timeout_secs = 180

# [tunnels.ollama]
# kind = "local"
# url = "http://localhost:11434"
# model = "qwen2.5-coder"

# [tunnels.gpu]
# kind = "remote"
# host = "gpu-box"
# model = "llama3.2"
# ssh_args = ["-p", "2222"]

# [tunnels.api]
# kind = "hosted"
# api_key_env = "ANTHROPIC_API_KEY"
# max_tokens = 2048

# Built-in circuits: one per tunnel, refine (ollama -> claude),
# consensus (claude + ollama) and auto (claude, api, ollama, echo).

# [circuits.review]
# kind = "chain"
# tunnels = ["ollama", "claude"]
"#;

/// Initialize tunnelvision in `root`
pub fn init_project(root: &Path) -> Result<(), String> {
    println!("\n{}", "Initializing tunnelvision...".cyan().bold());
    println!("   Directory: {}\n", root.display());

    let local_dir = root.join(LOCAL_DIR);
    create_dir_if_missing(&local_dir)?;

    write_file_if_missing(
        &local_dir.join(CONFIG_FILE),
        CONFIG_TEMPLATE,
        &format!("{}/{}", LOCAL_DIR, CONFIG_FILE),
    )?;

    add_to_gitignore(root)?;

    println!("\n{}", "tunnelvision initialized!".green().bold());
    println!("\nNext steps:");
    println!("  1. Run {} to see which backends are reachable", "tunnelvision tunnels".cyan());
    println!("  2. Run {} to start editing", "tunnelvision edit FILE".cyan());
    println!("  3. Prefix a prompt with {} to pick a circuit", "@refine".cyan());
    println!();

    Ok(())
}

fn create_dir_if_missing(path: &Path) -> Result<(), String> {
    if !path.exists() {
        fs::create_dir_all(path)
            .map_err(|e| format!("Could not create {}: {}", path.display(), e))?;
        println!("   {} {}", "Creating".green(), path.display());
    }
    Ok(())
}

fn write_file_if_missing(path: &Path, content: &str, display_name: &str) -> Result<(), String> {
    if path.exists() {
        println!("   {} {} (already exists)", "Skipping".yellow(), display_name);
    } else {
        fs::write(path, content)
            .map_err(|e| format!("Could not write {}: {}", display_name, e))?;
        println!("   {} {}", "Creating".green(), display_name);
    }
    Ok(())
}

fn add_to_gitignore(root: &Path) -> Result<(), String> {
    let gitignore_path = root.join(".gitignore");

    if gitignore_path.exists() {
        let existing = fs::read_to_string(&gitignore_path)
            .map_err(|e| format!("Could not read .gitignore: {}", e))?;

        if existing.lines().any(|line| line.trim() == GITIGNORE_ENTRY) {
            return Ok(());
        }

        let new_content = format!(
            "{}\n\n# tunnelvision edit locks\n{}\n",
            existing.trim_end(),
            GITIGNORE_ENTRY
        );
        fs::write(&gitignore_path, new_content)
            .map_err(|e| format!("Could not update .gitignore: {}", e))?;
        println!("   {} .gitignore (added {})", "Updated".green(), GITIGNORE_ENTRY);
    } else {
        let content = format!("# tunnelvision edit locks\n{}\n", GITIGNORE_ENTRY);
        fs::write(&gitignore_path, content)
            .map_err(|e| format!("Could not create .gitignore: {}", e))?;
        println!("   {} .gitignore", "Creating".green());
    }

    Ok(())
}
