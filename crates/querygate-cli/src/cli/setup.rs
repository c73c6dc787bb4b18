use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "qgate",
    bin_name = "qgate",
    version,
    disable_help_subcommand = true,
    about = "Query and act on gateway entities from the command line",
    long_about = None
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// JSON snapshot holding the tables; created on the first write
    #[arg(long, short = 'd', global = true, help_heading = "Options")]
    pub data: Option<PathBuf>,

    /// Config file (TOML) layered under QUERYGATE_* environment variables
    #[arg(long, short = 'c', global = true, help_heading = "Options")]
    pub config: Option<PathBuf>,

    /// Act as the user with this id; anonymous when omitted
    #[arg(long, short = 'a', global = true, help_heading = "Options")]
    pub actor: Option<u64>,

    /// Role granted to the actor (repeatable)
    #[arg(long, short = 'r', global = true, requires = "actor", help_heading = "Options")]
    pub role: Vec<String>,

    /// Verbose output (-v for debug, -vv for trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count, help_heading = "Options")]
    pub verbose: u8,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print every route the gateway exposes
    Routes,

    /// List an entity: qgate list posts status=published sort=-created_at
    List {
        /// Entity alias
        alias: String,

        /// Query parameters as key=value (filters, version, sort, per_page, page, cursor)
        #[arg(value_name = "KEY=VALUE")]
        params: Vec<String>,
    },

    /// Run a named action: qgate action posts publish --id 3
    Action {
        /// Entity alias
        alias: String,

        /// Action name
        name: String,

        /// Target record id for record actions
        #[arg(long)]
        id: Option<u64>,

        /// JSON payload, or '-' to read it from stdin
        #[arg(long, short = 'p')]
        payload: Option<String>,

        /// Client address recorded by actions that keep one
        #[arg(long)]
        ip: Option<String>,

        /// Do not write changes back to the data file
        #[arg(long)]
        dry_run: bool,
    },

    /// Inspect configuration
    Config {
        #[command(subcommand)]
        action: ConfigCommands,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Print the effective configuration as JSON
    Show,
    /// Print a commented TOML template with every setting and its default
    Template,
}

pub fn parse_cli() -> Cli {
    Cli::parse()
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn command_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_list_params_and_globals() {
        let cli = Cli::try_parse_from([
            "qgate", "list", "posts", "status=published", "--actor", "3", "-r", "admin", "-vv",
        ])
        .unwrap();
        assert_eq!(cli.actor, Some(3));
        assert_eq!(cli.role, vec!["admin"]);
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Commands::List { alias, params } => {
                assert_eq!(alias, "posts");
                assert_eq!(params, vec!["status=published"]);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn role_requires_actor() {
        assert!(Cli::try_parse_from(["qgate", "routes", "--role", "admin"]).is_err());
    }
}
