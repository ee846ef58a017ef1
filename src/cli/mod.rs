use anyhow::bail;
use std::path::PathBuf;
use std::sync::Arc;

use crate::appfile;
use crate::compile::{self, CompileEvent, CompileOpts, Compiler};
use crate::fetch;

/// Compiled data lives here, relative to the Appfile's directory.
pub const OUTPUT_DIR: &str = ".appc/compiled";

pub fn run_cli<I>(args: I) -> i32
where
    I: IntoIterator<Item = String>,
{
    let mut args = args.into_iter();
    let Some(command) = args.next() else {
        print_usage();
        return 1;
    };
    let target = args.next();
    if let Some(extra) = args.next() {
        eprintln!("unknown argument: {}", extra);
        return 1;
    }

    let result = match command.as_str() {
        "compile" => cmd_compile(target),
        "graph" => cmd_graph(target),
        "version" => cmd_version(),
        _ => {
            eprintln!("unknown command: {}", command);
            print_usage();
            return 1;
        }
    };
    match result {
        Ok(()) => 0,
        Err(err) => {
            eprintln!("{err}");
            1
        }
    }
}

fn print_usage() {
    eprintln!("usage: appc compile [path]");
    eprintln!("   or: appc graph [dir]");
    eprintln!("   or: appc version");
}

fn cmd_compile(target: Option<String>) -> anyhow::Result<()> {
    let appfile_path = locate_appfile(target)?;
    let file = appfile::parse_file(&appfile_path)?;

    let out = appfile_path
        .parent()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(OUTPUT_DIR);

    let compiler = Compiler::new(CompileOpts {
        dir: out.clone(),
        loader: None,
        callback: Some(Arc::new(|event: &CompileEvent| match event {
            CompileEvent::Dep { source } => eprintln!("fetching dependency: {}", source),
            CompileEvent::Import { source } => eprintln!("fetching import: {}", source),
        })),
    })?;

    let compiled = compiler.compile(file)?;
    eprintln!(
        "compiled {} vertices into {}",
        compiled.graph.len(),
        out.display()
    );
    Ok(())
}

fn cmd_graph(target: Option<String>) -> anyhow::Result<()> {
    let dir = PathBuf::from(target.unwrap_or_else(|| ".".to_string()));
    let compiled_dir = if dir.join(compile::COMPILE_VERSION_FILENAME).exists() {
        dir
    } else {
        dir.join(OUTPUT_DIR)
    };
    let compiled = compile::load_compiled(&compiled_dir)?;
    eprintln!("{compiled}");
    Ok(())
}

fn cmd_version() -> anyhow::Result<()> {
    eprintln!(
        "appc {} ({})",
        env!("CARGO_PKG_VERSION"),
        option_env!("APPC_GIT_COMMIT").unwrap_or("unknown commit")
    );
    Ok(())
}

fn locate_appfile(target: Option<String>) -> anyhow::Result<PathBuf> {
    let input = PathBuf::from(target.unwrap_or_else(|| ".".to_string()));
    let path = if input.is_dir() {
        input.join("Appfile")
    } else {
        input
    };
    let path = if path.is_absolute() {
        path
    } else {
        fetch::clean_path(&std::env::current_dir()?.join(path))
    };
    if !path.is_file() {
        bail!("no Appfile found at {}", path.display());
    }
    Ok(path)
}
