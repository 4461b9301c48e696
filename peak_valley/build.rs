use clap::CommandFactory;
use std::env;
use std::fs;
use std::path::PathBuf;

fn render(cmd: clap::Command, path: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let man = clap_mangen::Man::new(cmd);
    let mut buffer: Vec<u8> = Default::default();
    man.render(&mut buffer)?;
    fs::write(path, &buffer)?;
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let out_dir = PathBuf::from(env::var("OUT_DIR")?);
    let version: &'static str = Box::leak(env::var("CARGO_PKG_VERSION")?.into_boxed_str());

    // OUT_DIR is target/<profile>/build/<pkg>/out
    let workspace_root = out_dir.join("../../../../../");
    let man_dir = workspace_root.join("man").join("man1");
    let docs_dir = workspace_root.join("docs");
    fs::create_dir_all(&man_dir)?;
    fs::create_dir_all(&docs_dir)?;

    let cmd = peak_valley_cli_types::Cli::command().version(version);
    for subcmd in cmd.get_subcommands() {
        let name = subcmd.get_name();
        render(subcmd.clone(), man_dir.join(format!("peak-valley-{name}.1")))?;
    }
    render(cmd, man_dir.join("peak-valley.1"))?;

    let markdown = clap_markdown::help_markdown::<peak_valley_cli_types::Cli>();
    fs::write(docs_dir.join("manpage.md"), markdown)?;

    println!("cargo:rerun-if-changed=../cli_types/src/lib.rs");
    Ok(())
}
