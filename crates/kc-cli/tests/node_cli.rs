use clap::{CommandFactory, Parser};
use kc_cli::node_cli::{Cli, Command, NodeCommand, NodeSshArgs};

fn parse(argv: &[&str]) -> Result<Cli, clap::Error> {
    Cli::try_parse_from(std::iter::once("kcast").chain(argv.iter().copied()))
}

fn ssh_args(cli: Cli) -> NodeSshArgs {
    match cli.command {
        Command::Node {
            command: NodeCommand::Ssh(args),
        } => args,
    }
}

#[test]
fn cli_definition_is_consistent() {
    Cli::command().debug_assert();
}

#[test]
fn full_invocation_parses() {
    let cli = parse(&["node", "ssh", "--cluster", "prod", "worker-a", "--user", "admin", "-p", "2222"]).unwrap();
    assert!(!cli.debug);
    let args = ssh_args(cli);
    assert_eq!(args.cluster, "prod");
    assert_eq!(args.node.as_deref(), Some("worker-a"));
    assert_eq!(args.user.as_deref(), Some("admin"));
    assert_eq!(args.port, Some(2222));
}

#[test]
fn node_and_overrides_are_optional() {
    let cli = parse(&["--debug", "node", "ssh", "-c", "0f8fad5b-d9cb-469f-a165-70867728950e"]).unwrap();
    assert!(cli.debug);
    let args = ssh_args(cli);
    assert_eq!(args.node, None);
    assert_eq!(args.user, None);
    assert_eq!(args.port, None);
}

#[test]
fn debug_flag_is_global() {
    let cli = parse(&["node", "ssh", "-c", "prod", "--debug"]).unwrap();
    assert!(cli.debug);
}

#[test]
fn cluster_is_required() {
    let err = parse(&["node", "ssh", "worker-a"]).unwrap_err();
    assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
}

#[test]
fn invalid_port_is_rejected() {
    let err = parse(&["node", "ssh", "-c", "prod", "-p", "70000"]).unwrap_err();
    assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
}
