//! Command-line interface for pypredef-gen.

use crate::introspection::{introspect_library, remove_class_docstrings};
use crate::registry::{introspect_registry, read_registry_dump, TypeTable};
use crate::stubs::module_stub_files;
use crate::writer::write_stub_files;
use anyhow::{bail, Context, Result};
use clap::Parser;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Exit codes.
pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_ERROR: i32 = 1;

/// Generate predefined completion files (.pypredef) for the host
/// application's Python extension modules and its procedure registry.
///
/// Point the IDE's predefined-completions setting at the output directory
/// to get code completion for binary extension modules the IDE cannot
/// parse directly. With neither --modules nor --registry, both sets are
/// generated.
#[derive(Parser)]
#[command(name = "pypredef-gen")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Generate completions for the extension modules given with --library
    #[arg(long)]
    pub modules: bool,

    /// Generate completions for the procedure registry given with
    /// --registry-dump
    #[arg(long)]
    pub registry: bool,

    /// Output directory for the .pypredef files
    #[arg(long, default_value = "pypredefs")]
    pub out_dir: PathBuf,

    /// Extension library to introspect, as NAME=PATH or a bare path (the
    /// module name is then derived from the file stem)
    #[arg(long = "library", value_name = "NAME=PATH")]
    pub libraries: Vec<String>,

    /// JSON snapshot of the procedure registry
    #[arg(long, value_name = "PATH")]
    pub registry_dump: Option<PathBuf>,

    /// JSON type table overriding the built-in humanization defaults
    #[arg(long, value_name = "PATH")]
    pub type_table: Option<PathBuf>,

    /// Drop class docstrings for the module with the given dotted name, e.g.
    /// app or app.util (repeatable). Useful for modules mirroring docstrings
    /// of an underlying C library.
    #[arg(long, value_name = "MODULE")]
    pub strip_class_docstrings: Vec<String>,
}

/// Run the generation command.
pub fn run(cli: &Cli) -> Result<()> {
    // Mirror the host defaults: with no explicit flag, generate both sets
    let (generate_modules, generate_registry) = if !cli.modules && !cli.registry {
        (true, true)
    } else {
        (cli.modules, cli.registry)
    };

    if cli.modules && cli.libraries.is_empty() {
        bail!("--modules requires at least one --library");
    }

    let mut files = BTreeMap::new();

    if generate_modules {
        for library in &cli.libraries {
            let (module_name, path) = parse_library_spec(library)?;
            let mut module = introspect_library(&path, &module_name)?;
            remove_class_docstrings(&mut module, &cli.strip_class_docstrings);
            files.append(&mut module_stub_files(&module));
        }
    }

    if generate_registry {
        match &cli.registry_dump {
            Some(dump_path) => {
                let table = match &cli.type_table {
                    Some(path) => TypeTable::from_json_file(path)?,
                    None => TypeTable::default(),
                };
                let dump = read_registry_dump(dump_path)?;
                files.append(&mut module_stub_files(&introspect_registry(&dump, &table)));
            }
            None if cli.registry => bail!("--registry requires --registry-dump"),
            None => (),
        }
    }

    if files.is_empty() {
        bail!("Nothing to generate: pass --library and/or --registry-dump");
    }

    write_stub_files(&files, &cli.out_dir)?;
    for file_name in files.keys() {
        println!("Wrote {}", cli.out_dir.join(file_name).display());
    }
    println!(
        "Generated {} stub file(s) in {}",
        files.len(),
        cli.out_dir.display()
    );
    Ok(())
}

fn parse_library_spec(spec: &str) -> Result<(String, PathBuf)> {
    if let Some((name, path)) = spec.split_once('=') {
        if name.is_empty() || path.is_empty() {
            bail!("Invalid library {spec:?}, expected NAME=PATH");
        }
        return Ok((name.into(), PathBuf::from(path)));
    }
    let path = PathBuf::from(spec);
    let stem = path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .with_context(|| format!("Cannot derive a module name from {spec:?}"))?;
    // Shared libraries are usually named lib<module>.so
    let name = stem.strip_prefix("lib").unwrap_or(stem);
    Ok((name.into(), path))
}
