//! Project-level commands: scaffolding, metadata and builds.

use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::path::Path;

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::config;
use crate::context::Context;
use crate::engine::Engine;
use crate::environment::{self, FLAKE_FILE, NIX_FILE};
use crate::error::{Error, Result};
use crate::gc;
use crate::infrastructure::{Handoff, RunOptions};
use crate::log;


/// Files `init` scaffolds, copied from the `simple` example.
pub const SCAFFOLD_FILES: [&str; 3] = [NIX_FILE, config::CONFIG_FILE, ".envrc"];

const GITIGNORE_BLOCK: &str = "\n# devkit\n.devkit*\ndevkit.local.nix\n\n# direnv\n.direnv\n\n# pre-commit\n.pre-commit-config.yaml\n\n";


/// Scaffold a project in `target` from the bundled `simple` example.
pub fn init(engine: &Engine, target: &Path) -> Result<()> {
    std::fs::create_dir_all(target).map_err(|e| Error::file(target, e))?;
    for name in SCAFFOLD_FILES {
        if target.join(name).exists() {
            return Err(Error::ProjectExists { file: name.into() });
        }
    }

    let example = engine
        .ctx()
        .modules_dir
        .join("..")
        .join("..")
        .join("examples")
        .join("simple");
    for name in SCAFFOLD_FILES {
        let dst = target.join(name);
        info!("Creating {}", dst.display());
        std::fs::copy(example.join(name), &dst).map_err(|e| Error::file(example.join(name), e))?;
    }

    append_gitignore(&target.join(".gitignore"))?;
    info!("Done.");

    let quiet = RunOptions {
        quiet_stderr: true,
        silent: true,
        ..RunOptions::in_dir(target)
    };
    if engine.runner().run("command -v direnv", &quiet).is_ok() {
        info!("direnv is installed. Running $ direnv allow .");
        engine.runner().run("direnv allow", &RunOptions::in_dir(target))?;
    }
    Ok(())
}


fn append_gitignore(path: &Path) -> Result<()> {
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .read(true)
        .append(true)
        .open(path)
        .map_err(|e| Error::file(path, e))?;
    let mut existing = String::new();
    file.read_to_string(&mut existing).map_err(|e| Error::file(path, e))?;
    if existing.contains("devkit") {
        return Ok(());
    }
    info!("Appending defaults to .gitignore");
    file.write_all(GITIGNORE_BLOCK.as_bytes())
        .map_err(|e| Error::file(path, e))
}


/// `devkit <version> (<system>)`
pub fn version(ctx: &Context) -> Result<String> {
    Ok(format!(
        "devkit {} ({})",
        environment::latest_version(&ctx.modules_dir)?,
        ctx.system
    ))
}


/// Locked inputs followed by the project's own summary.
pub fn info(engine: &Engine) -> Result<String> {
    environment::assemble(engine)?;
    let metadata = engine.run_nix("flake metadata")?;
    let inputs = metadata
        .find("Inputs:")
        .map(|at| &metadata[at..])
        .unwrap_or("");
    let summary = engine.run_nix("eval --raw '.#info'")?;
    Ok(format!("{}\n{}", inputs, summary))
}


/// Refresh the lock file, for one input or all of them.
pub fn update(engine: &Engine, input: Option<&str>) -> Result<()> {
    environment::assemble(engine)?;
    match input {
        Some(name) => engine.run_nix(&format!("flake lock --update-input {}", name))?,
        None => engine.run_nix("flake update")?,
    };
    Ok(())
}


/// Build `devkit.<attr>` for each attribute and return the output paths.
pub fn build(engine: &Engine, attrs: &[String]) -> Result<Vec<String>> {
    environment::assemble(engine)?;
    let installables: Vec<String> = attrs.iter().map(|a| format!(".#devkit.{}", a)).collect();
    let output = engine.run_nix(&format!(
        "build --print-out-paths --print-build-logs --no-link {}",
        installables.join(" ")
    ))?;

    let paths: Vec<String> = output.lines().map(str::to_string).collect();
    info!("Built:");
    for path in &paths {
        info!("{}", path);
    }
    Ok(paths)
}


/// Build everything the project declares and root the result as `ci`.
pub fn ci(engine: &Engine) -> Result<String> {
    environment::assemble(engine)?;
    debug!("Using flake {}", engine.ctx().root.join(FLAKE_FILE).display());
    let output = engine.build(".#ci")?;
    gc::register(engine, "ci", &output)?;
    Ok(output)
}


/// Width search results are cut to.
const DESCRIPTION_WIDTH: usize = 80;

/// Where the `optionsJSON` output keeps the option documentation.
const OPTIONS_DOC: &str = "share/doc/nixos/options.json";


#[derive(Debug, Deserialize)]
struct OptionDoc {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    default: Option<Value>,
    #[serde(default)]
    description: Option<Value>,
}


#[derive(Debug, Deserialize)]
struct PackageHit {
    #[serde(default)]
    version: String,
    #[serde(default)]
    description: String,
}


/// Packages in the `nixpkgs` input and devkit options whose name contains
/// `name`, rendered as tables. Empty when nothing matched.
pub fn search(engine: &Engine, name: &str) -> Result<String> {
    environment::assemble(engine)?;
    let options = engine.build("'.#optionsJSON'")?;
    let found = engine.run_nix(&format!("search --json nixpkgs {}", name))?;

    let doc_path = Path::new(options.trim()).join(OPTIONS_DOC);
    let raw = std::fs::read_to_string(&doc_path).map_err(|e| Error::file(&doc_path, e))?;
    let docs: BTreeMap<String, OptionDoc> = serde_json::from_str(&raw)?;
    let option_rows: Vec<Vec<String>> = docs
        .iter()
        .filter(|(key, _)| key.contains(name))
        .map(|(key, doc)| {
            vec![
                key.clone(),
                doc.kind.clone(),
                doc.default.as_ref().map(doc_text).unwrap_or_default(),
                clip(&doc.description.as_ref().map(doc_text).unwrap_or_default()),
            ]
        })
        .collect();

    let hits: BTreeMap<String, PackageHit> = if found.is_empty() {
        BTreeMap::new()
    } else {
        serde_json::from_str(&found)?
    };
    // "legacyPackages.<system>.hello" -> "pkgs.hello"
    let package_rows: Vec<Vec<String>> = hits
        .iter()
        .map(|(key, hit)| {
            let attr: Vec<&str> = key.split('.').skip(2).collect();
            vec![
                format!("pkgs.{}", attr.join(".")),
                hit.version.clone(),
                clip(&hit.description),
            ]
        })
        .collect();

    let mut tables = Vec::new();
    if !package_rows.is_empty() {
        tables.push(ascii_table(&["Package", "Version", "Description"], &package_rows));
    }
    if !option_rows.is_empty() {
        tables.push(ascii_table(&["Option", "Type", "Default", "Description"], &option_rows));
    }
    info!(
        "Found {} packages and {} options for '{}'.",
        package_rows.len(),
        option_rows.len(),
        name
    );
    Ok(tables.join("\n"))
}


/// Option docs are plain strings or `{ "_type": ..., "text": ... }`.
fn doc_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Object(map) => match map.get("text") {
            Some(Value::String(text)) => text.clone(),
            _ => value.to_string(),
        },
        other => other.to_string(),
    }
}


fn clip(text: &str) -> String {
    text.chars().take(DESCRIPTION_WIDTH).collect()
}


fn ascii_table(header: &[&str], rows: &[Vec<String>]) -> String {
    let mut widths: Vec<usize> = header.iter().map(|h| h.chars().count()).collect();
    for row in rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }
    let rule = format!(
        "+{}+",
        widths.iter().map(|w| "-".repeat(w + 2)).collect::<Vec<_>>().join("+")
    );
    let line = |cells: Vec<&str>| {
        let padded: Vec<String> = cells
            .iter()
            .zip(&widths)
            .map(|(cell, w)| format!(" {}{} ", cell, " ".repeat(w - cell.chars().count())))
            .collect();
        format!("|{}|", padded.join("|"))
    };

    let mut out = vec![rule.clone(), line(header.to_vec()), rule.clone()];
    for row in rows {
        out.push(line(row.iter().map(String::as_str).collect()));
    }
    out.push(rule);
    out.join("\n")
}


/// What `container` does after building the image.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContainerOptions {
    /// Copy destination; the copy script's `false` when unset.
    pub registry: Option<String>,
    pub copy: bool,
    /// Passed through to the copy script.
    pub copy_args: Option<String>,
    /// Copy into the local docker daemon and run the container.
    pub docker_run: bool,
}


/// Build container `name`, optionally copy it to a registry, and with
/// `docker_run` hand off to its run script.
///
/// Every build is impure: the container definition reads `DEVKIT_CONTAINER`.
pub fn container(
    engine: &Engine,
    name: &str,
    opts: &ContainerOptions,
) -> Result<Option<Handoff>> {
    let ctx = engine.ctx();
    let mut run_opts = engine.options();
    run_opts.envs.push(("DEVKIT_CONTAINER".into(), name.to_string()));
    let build_attr = |attr: &str| {
        engine.run_nix_with(
            &format!(
                "build --impure --print-out-paths --no-link '.#devkit.containers.\"{}\".{}'",
                name, attr
            ),
            &run_opts,
        )
    };

    let spec = log::task(&format!("Building {} container", name), || {
        environment::assemble(engine)?;
        build_attr("derivation")
    })?;
    info!("{}", spec);

    if opts.copy || opts.docker_run {
        log::task(&format!("Copying {} container", name), || {
            let copy_script = build_attr("copyScript")?;
            let registry = if opts.docker_run {
                "docker-daemon:"
            } else {
                opts.registry.as_deref().unwrap_or("false")
            };
            let cp = format!(
                "{} {} {} {}",
                copy_script,
                spec,
                registry,
                opts.copy_args.as_deref().unwrap_or("")
            );
            info!("Running '{}'", cp.trim_end());
            let inherit = RunOptions {
                inherit_stdout: true,
                ..run_opts.clone()
            };
            engine.runner().run(cp.trim_end(), &inherit)
        })?;
    }

    if !opts.docker_run {
        return Ok(None);
    }
    info!("Starting {} container", name);
    let docker_run = build_attr("dockerRun")?;
    let mut handoff = Handoff::program(ctx, Path::new(&docker_run));
    handoff.envs = run_opts.envs.clone();
    Ok(Some(handoff))
}


/// Add an input to `devkit.yaml`, each of `follows` pointing at an
/// existing input of the same name.
pub fn inputs_add(ctx: &Context, name: &str, url: &str, follows: &[String]) -> Result<()> {
    let mut cfg = config::load(&ctx.root)?;
    config::add_input(&mut cfg, name, url, follows)?;
    config::save(&ctx.root, &cfg)
}
