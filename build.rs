// build.rs

use clap::{Arg, ArgAction, Command};
use clap_mangen::Man;
use std::env;
use std::fs;
use std::path::PathBuf;

fn package_arg() -> Arg {
    Arg::new("packages")
        .required(true)
        .num_args(1..)
        .help("Package names")
}

fn force_arg() -> Arg {
    Arg::new("force")
        .short('f')
        .long("force")
        .action(ArgAction::SetTrue)
        .help("Reinstall even when up to date or frozen")
}

fn build_cli() -> Command {
    Command::new("haul")
        .version(env!("CARGO_PKG_VERSION"))
        .author("Haul Contributors")
        .about("Bucket-based package manager with atomic installs and per-package environments")
        .subcommand_required(false)
        .arg(
            Arg::new("root")
                .long("root")
                .value_name("DIR")
                .global(true)
                .help("Managed root directory (default: ~/.haul, env: HAUL_ROOT)"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(ArgAction::Count)
                .global(true)
                .help("Increase log verbosity (-v info, -vv debug)"),
        )
        .subcommand(
            Command::new("install")
                .about("Install packages from the configured buckets")
                .arg(package_arg())
                .arg(force_arg()),
        )
        .subcommand(
            Command::new("uninstall")
                .about("Remove installed packages")
                .arg(package_arg()),
        )
        .subcommand(
            Command::new("update")
                .about("Sync buckets and show available upgrades")
                .arg(
                    Arg::new("buckets")
                        .num_args(0..)
                        .help("Bucket names (syncs all if omitted)"),
                ),
        )
        .subcommand(
            Command::new("upgrade")
                .about("Upgrade installed packages")
                .arg(
                    Arg::new("packages")
                        .num_args(0..)
                        .help("Package names (upgrades everything not frozen if omitted)"),
                )
                .arg(force_arg()),
        )
        .subcommand(Command::new("list").about("List installed packages"))
        .subcommand(
            Command::new("search")
                .about("Search bucket packages by glob pattern")
                .arg(Arg::new("pattern").required(true).help("Glob pattern, matched case-insensitively")),
        )
        .subcommand(
            Command::new("info")
                .about("Show package metadata")
                .arg(Arg::new("package").required(true).help("Package name")),
        )
        .subcommand(
            Command::new("freeze")
                .about("Pin a package at its installed version")
                .arg(Arg::new("package").required(true).help("Package name")),
        )
        .subcommand(
            Command::new("unfreeze")
                .about("Allow a frozen package to upgrade again")
                .arg(Arg::new("package").required(true).help("Package name")),
        )
        .subcommand(
            Command::new("exec")
                .about("Run a command inside package environments")
                .arg(
                    Arg::new("package")
                        .short('p')
                        .long("package")
                        .action(ArgAction::Append)
                        .help("Packages whose environments to activate"),
                )
                .arg(
                    Arg::new("command")
                        .last(true)
                        .required(true)
                        .num_args(1..)
                        .help("Command line to run"),
                ),
        )
        .subcommand(
            Command::new("bucket")
                .about("Manage buckets")
                .subcommand_required(true)
                .subcommand(
                    Command::new("add")
                        .about("Add a bucket and sync it")
                        .arg(Arg::new("name").required(true).help("Bucket name"))
                        .arg(Arg::new("url").required(true).help("Git repository or snapshot archive URL"))
                        .arg(
                            Arg::new("weight")
                                .short('w')
                                .long("weight")
                                .default_value("100")
                                .help("Priority weight (lower = preferred)"),
                        )
                        .arg(
                            Arg::new("feed")
                                .long("feed")
                                .action(ArgAction::SetTrue)
                                .help("Treat the URL as a snapshot archive"),
                        )
                        .arg(
                            Arg::new("foreign")
                                .long("foreign")
                                .action(ArgAction::SetTrue)
                                .help("Package documents use the foreign schema"),
                        )
                        .arg(
                            Arg::new("replace")
                                .long("replace")
                                .action(ArgAction::SetTrue)
                                .help("Replace an existing bucket of the same name"),
                        ),
                )
                .subcommand(
                    Command::new("remove")
                        .about("Remove a bucket and its checkout")
                        .arg(Arg::new("name").required(true).help("Bucket name")),
                )
                .subcommand(Command::new("list").about("List buckets in priority order")),
        )
        .subcommand(
            Command::new("completions")
                .about("Generate shell completion scripts")
                .arg(
                    Arg::new("shell")
                        .required(true)
                        .value_parser(["bash", "elvish", "fish", "powershell", "zsh"])
                        .help("Shell type"),
                ),
        )
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    // Create man directory
    let out_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR").unwrap());
    let man_dir = out_dir.join("man");
    fs::create_dir_all(&man_dir).expect("Failed to create man directory");

    // Generate main man page
    let cmd = build_cli();
    let man = Man::new(cmd);
    let mut buffer = Vec::new();
    man.render(&mut buffer).expect("Failed to render man page");

    let man_path = man_dir.join("haul.1");
    fs::write(&man_path, buffer).expect("Failed to write man page");
}
