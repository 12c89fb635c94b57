//! CLI argument parsing for the adun-worker binary.

use clap::{Parser, Subcommand};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "adun-worker", about = "ADUN constituency platform backend worker")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Start the worker server (default if no subcommand given)
    Serve,
    /// Run database migrations and exit
    Migrate,
    /// Upload an SPR CSV file to a running worker in chunks
    ImportVoters {
        /// Path to the CSV file (header must include 'Nama')
        #[arg(long)]
        file: String,
        /// Existing voter-list version to import into
        #[arg(long, conflicts_with = "new_version")]
        version_id: Option<Uuid>,
        /// Create a fresh voter-list version with this label
        #[arg(long)]
        new_version: Option<String>,
        /// User to attribute the import to
        #[arg(long, default_value_t = Uuid::nil())]
        user_id: Uuid,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_cli_migrate_command_parses() {
        let cli = Cli::parse_from(["adun-worker", "migrate"]);
        assert!(matches!(cli.command, Some(Command::Migrate)));
    }

    #[test]
    fn test_cli_no_command_defaults_to_none() {
        let cli = Cli::parse_from(["adun-worker"]);
        assert!(cli.command.is_none());
    }

    #[test]
    fn test_cli_import_voters_parses_file_and_version() {
        let version = Uuid::new_v4();
        let version_arg = version.to_string();
        let cli = Cli::parse_from([
            "adun-worker",
            "import-voters",
            "--file",
            "voters.csv",
            "--version-id",
            version_arg.as_str(),
        ]);
        match cli.command {
            Some(Command::ImportVoters { file, version_id, new_version, .. }) => {
                assert_eq!(file, "voters.csv");
                assert_eq!(version_id, Some(version));
                assert!(new_version.is_none());
            }
            _ => panic!("expected import-voters command"),
        }
    }

    #[test]
    fn test_cli_import_voters_rejects_both_version_flags() {
        let result = Cli::try_parse_from([
            "adun-worker",
            "import-voters",
            "--file",
            "voters.csv",
            "--version-id",
            "00000000-0000-0000-0000-000000000001",
            "--new-version",
            "DPI 2026",
        ]);
        assert!(result.is_err());
    }
}
