//! dirsync command-line tool.
//!
//! Provides subcommands for generating and validating configuration files
//! and for resolving users and group memberships out of the configured
//! directory.

mod style;

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use comfy_table::{presets::UTF8_FULL, Cell, ContentArrangement, Table};
use tracing::info;
use tracing_subscriber::EnvFilter;

use dirsync_core::config::{AppConfig, IdentityKey};
use dirsync_core::directory::{DirectoryConnector, LdapTransport};
use dirsync_core::export;
use dirsync_core::models::Resolution;

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// dirsync command-line tool.
#[derive(Parser, Debug)]
#[command(
    name = "dirsync",
    version,
    about = "Resolve users and group memberships from an LDAP directory"
)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, global = true, default_value = "./dirsync.toml")]
    config: PathBuf,

    /// Log level override (trace, debug, info, warn, error).
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate a default configuration file.
    Init {
        /// Output path for the generated config file.
        #[arg(short, long, default_value = "./dirsync.toml")]
        output: PathBuf,
    },

    /// Validate a configuration file.
    Validate,

    /// Resolve users and groups and export the records.
    Resolve {
        /// Group to resolve (repeatable). Defaults to `sync.groups`.
        #[arg(short, long = "group")]
        groups: Vec<String>,

        /// Skip the all-users search.
        #[arg(long)]
        no_all_users: bool,

        /// Output format.
        #[arg(long, value_enum, default_value_t = OutputFormat::Csv)]
        format: OutputFormat,

        /// Output file. Defaults to standard output.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum OutputFormat {
    Csv,
    Json,
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_logging(level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(level))
        .with_target(false)
        .with_writer(io::stderr)
        .init();
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Init { output } => {
            init_logging(cli.log_level.as_deref().unwrap_or("warn"));
            cmd_init(&output)
        }
        Commands::Validate => {
            init_logging(cli.log_level.as_deref().unwrap_or("warn"));
            cmd_validate(&cli.config)
        }
        Commands::Resolve {
            groups,
            no_all_users,
            format,
            output,
        } => {
            let config = load_config(&cli.config)?;
            init_logging(cli.log_level.as_deref().unwrap_or(&config.logging.level));
            config.validate().context("invalid configuration")?;
            cmd_resolve(&config, groups, !no_all_users, format, output.as_deref())
        }
    }
}

// ---------------------------------------------------------------------------
// Config helpers
// ---------------------------------------------------------------------------

fn load_config(path: &Path) -> Result<AppConfig> {
    let mut config =
        AppConfig::load_from_file(path).context("failed to load configuration file")?;
    config
        .resolve_env_vars()
        .context("failed to resolve environment variables")?;
    Ok(config)
}

// ---------------------------------------------------------------------------
// Subcommand implementations
// ---------------------------------------------------------------------------

fn cmd_init(output: &Path) -> Result<()> {
    let default_config = r#"# dirsync configuration
# See documentation for all available options.

[logging]
level = "info"

[connection]
host = "ldaps://ldap.example.com"
username = "cn=reader,ou=Service,dc=example,dc=com"
password_env = "DIRSYNC_LDAP_PASSWORD"
authentication_method = "simple"
require_tls_cert = true
starttls = false
connect_timeout_secs = 30

[directory]
base_dn = "dc=example,dc=com"
all_users_filter = "(&(objectClass=user)(objectCategory=person)(!(userAccountControl:1.2.840.113556.1.4.803:=2)))"
group_filter_format = "(&(|(objectCategory=group)(objectClass=groupOfNames)(objectClass=posixGroup))(cn={group}))"
# group_member_filter_format = "(memberOf={group_dn})"
string_encoding = "utf8"
search_page_size = 200
identity_key = "dn"
user_identity_type = "federatedID"
user_email_format = "{mail}"
# user_username_format = "{sAMAccountName}"
# user_domain_format = "example.com"
user_given_name_format = "{givenName}"
user_surname_format = "{sn}"
user_country_code_format = "{c}"
additional_group_filters = []
extended_attributes = []

# Read members from the group entry instead of a reverse filter.
# Cannot be combined with group_member_filter_format.
# [directory.two_steps_lookup]
# group_member_attribute_name = "member"
# nested_group = true

[sync]
groups = ["Engineering", "Sales"]
all_users = true
"#;

    if output.exists() {
        anyhow::bail!(
            "file already exists: {}. Use a different path or remove the existing file.",
            output.display()
        );
    }

    std::fs::write(output, default_config).context("failed to write config file")?;

    println!("{}", style::success(&format!("Default configuration written to {}", output.display())));
    println!();
    println!("Next steps:");
    println!("  1. Edit the config file with your directory details");
    println!("  2. Set the referenced environment variable (DIRSYNC_LDAP_PASSWORD)");
    println!("  3. Validate with: dirsync validate --config {}", output.display());
    println!("  4. Resolve with: dirsync resolve --config {}", output.display());

    Ok(())
}

fn cmd_validate(config_path: &Path) -> Result<()> {
    println!("Validating configuration: {}", config_path.display());
    println!();

    let mut config =
        AppConfig::load_from_file(config_path).context("failed to parse configuration")?;
    println!("  [OK] TOML structure is valid");

    // Missing variables only warn here; validate() decides if they matter.
    let _ = config.resolve_env_vars();
    println!("  [OK] Environment variable references processed");

    match config.validate() {
        Ok(()) => println!("  [OK] All required fields are valid"),
        Err(e) => {
            println!("  [FAIL] Validation error: {}", e);
            anyhow::bail!("configuration validation failed");
        }
    }

    let directory = &config.directory;
    println!();
    println!("{}", style::header("Configuration summary:"));
    println!("  Server        : {}", config.connection.url());
    println!(
        "  Bind          : {}",
        config.connection.username.as_deref().unwrap_or("anonymous")
    );
    println!(
        "  Password      : {}",
        if config.connection.password.is_some() {
            "set"
        } else {
            "NOT SET"
        }
    );
    println!("  Base DN       : {}", directory.base_dn);
    println!("  Page size     : {}", directory.search_page_size);
    println!(
        "  Identity key  : {}",
        match &directory.identity_key {
            IdentityKey::Dn => "dn".to_string(),
            IdentityKey::Attribute(attr) => format!("attribute '{attr}'"),
        }
    );
    println!(
        "  Membership    : {}",
        match &directory.two_steps_lookup {
            Some(two_steps) if two_steps.nested_group => format!(
                "attribute '{}' (nested)",
                two_steps.group_member_attribute_name
            ),
            Some(two_steps) => format!("attribute '{}'", two_steps.group_member_attribute_name),
            None => format!("filter {}", directory.member_filter_format()),
        }
    );
    println!("  Groups        : {}", config.sync.groups.join(", "));
    println!();
    println!("{}", style::success("Configuration is valid."));

    Ok(())
}

fn cmd_resolve(
    config: &AppConfig,
    groups: Vec<String>,
    all_users: bool,
    format: OutputFormat,
    output: Option<&Path>,
) -> Result<()> {
    let groups = if groups.is_empty() {
        config.sync.groups.clone()
    } else {
        groups
    };
    let all_users = all_users && config.sync.all_users;

    let transport =
        LdapTransport::connect(&config.connection).context("failed to connect to directory")?;
    let mut connector = DirectoryConnector::new(transport, &config.directory)
        .context("invalid directory configuration")?;
    info!(groups = groups.len(), all_users, "starting resolution");

    let resolution = connector
        .load_users_and_groups(&groups, &config.directory.extended_attributes, all_users)
        .context("directory resolution failed")?;

    match output {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("failed to create {}", path.display()))?;
            write_records(BufWriter::new(file), format, &resolution)?;
            eprintln!("{}", style::success(&format!("Records written to {}", path.display())));
        }
        None => write_records(io::stdout().lock(), format, &resolution)?,
    }

    print_summary(&resolution);
    Ok(())
}

fn write_records<W: Write>(writer: W, format: OutputFormat, resolution: &Resolution) -> Result<()> {
    match format {
        OutputFormat::Csv => export::write_csv(writer, &resolution.users),
        OutputFormat::Json => export::write_json(writer, &resolution.users),
    }
    .context("failed to write records")
}

/// Resolution summary on stderr, so it never mixes with exported records.
fn print_summary(resolution: &Resolution) {
    let stats = &resolution.stats;
    eprintln!();
    eprintln!("{}", style::header("Resolution summary"));

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["Users", "In groups", "Not in groups", "Skipped", "Groups", "Duration"]);
    table.add_row(vec![
        Cell::new(stats.total_users),
        Cell::new(stats.grouped_users),
        Cell::new(stats.ungrouped_users),
        Cell::new(stats.skipped_entries),
        Cell::new(stats.groups_resolved),
        Cell::new(format!("{:.1}s", stats.duration_secs())),
    ]);
    eprintln!("{}", table);

    if resolution.failed_groups.is_empty() {
        eprintln!("{}", style::dim("All requested groups resolved."));
        return;
    }
    eprintln!(
        "{}",
        style::warn(&format!("{} group(s) could not be resolved:", resolution.failed_groups.len()))
    );
    for failure in &resolution.failed_groups {
        eprintln!("  {}", style::error(&format!("{}: {}", failure.group, failure.reason)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_resolve_flags() {
        let cli = Cli::try_parse_from([
            "dirsync",
            "--config",
            "/tmp/d.toml",
            "resolve",
            "-g",
            "Engineering",
            "--group",
            "Sales",
            "--no-all-users",
            "--format",
            "json",
        ])
        .unwrap();
        match cli.command {
            Commands::Resolve {
                groups,
                no_all_users,
                format,
                output,
            } => {
                assert_eq!(groups, vec!["Engineering", "Sales"]);
                assert!(no_all_users);
                assert!(matches!(format, OutputFormat::Json));
                assert!(output.is_none());
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_init_writes_valid_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dirsync.toml");

        cmd_init(&path).unwrap();
        let config = AppConfig::load_from_file(&path).unwrap();
        assert!(config.directory.validate().is_ok());
        assert!(cmd_init(&path).is_err());
    }
}
