//! `protoflow` CLI entry-point.
//!
//! Available sub-commands:
//! - `validate`: check every graph in a protocol document.
//! - `run`: execute the document's protocol and print the trace.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use engine::{
    validate_graph, Behavior, DefaultSpecialization, EngineConfig, ExecutionEngine, Graph, Library,
};
use primitives::{DefinedPrimitive, ParameterValue};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "protoflow",
    about = "Execution engine for laboratory protocol activity graphs",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Validate every graph in a protocol document.
    Validate {
        /// Path to the protocol JSON document.
        path: PathBuf,
    },
    /// Run the protocol and print its execution trace as JSON.
    Run {
        /// Path to the protocol JSON document.
        path: PathBuf,

        /// Who is running the protocol.
        #[arg(long, env = "PROTOFLOW_ACTOR", default_value = "protoflow")]
        actor: String,

        /// Top-level input binding, `name=<json>`; repeat for several.
        #[arg(long = "param", value_parser = parse_param)]
        params: Vec<ParameterValue>,

        /// Annotate specialization failures instead of aborting.
        #[arg(long, env = "PROTOFLOW_FAILSAFE")]
        failsafe: bool,

        /// Record failing nodes as run issues and keep going.
        #[arg(long, env = "PROTOFLOW_PERMISSIVE")]
        permissive: bool,

        /// Use reproducible timestamps.
        #[arg(long)]
        ordinal_time: bool,

        /// Skip graph validation before each run.
        #[arg(long)]
        no_validate: bool,

        #[arg(long, env = "PROTOFLOW_MAX_ROUNDS", default_value_t = 10_000)]
        max_rounds: usize,

        #[arg(long, env = "PROTOFLOW_MAX_DEPTH", default_value_t = 32)]
        max_depth: usize,
    },
}

/// A protocol and everything it calls.
///
/// Primitives carry their parameter declarations only, so their outputs
/// come back as placeholders.
#[derive(Debug, Serialize, Deserialize)]
struct ProtocolDocument {
    #[serde(default)]
    primitives: Vec<DefinedPrimitive>,
    #[serde(default)]
    subgraphs: Vec<Graph>,
    protocol: Graph,
}

impl ProtocolDocument {
    fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("invalid protocol document {}", path.display()))
    }

    fn library(&self) -> Library {
        let mut library = Library::new();
        for primitive in &self.primitives {
            library.register(Behavior::primitive(primitive.clone()));
        }
        for graph in &self.subgraphs {
            library.register(Behavior::sub_graph(graph.clone()));
        }
        library
    }

    fn graphs(&self) -> impl Iterator<Item = &Graph> {
        std::iter::once(&self.protocol).chain(&self.subgraphs)
    }
}

/// `name=<json>`; a value that is not valid JSON is taken as a string.
fn parse_param(raw: &str) -> Result<ParameterValue, String> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected name=value, got '{raw}'"))?;
    if name.is_empty() {
        return Err(format!("missing parameter name in '{raw}'"));
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok(ParameterValue::new(name, value))
}

fn validate(document: &ProtocolDocument) -> bool {
    let library = document.library();
    let mut valid = true;
    for graph in document.graphs() {
        let report = validate_graph(graph, &library);
        for issue in &report.warnings {
            warn!(graph = %graph.id, "{issue}");
        }
        for issue in &report.errors {
            error!(graph = %graph.id, "{issue}");
        }
        if report.is_valid() {
            println!("✅ {} is valid ({} warnings)", graph.id, report.warnings.len());
        } else {
            println!("❌ {} has {} errors", graph.id, report.errors.len());
            valid = false;
        }
    }
    valid
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Validate { path } => {
            let document = ProtocolDocument::load(&path)?;
            if !validate(&document) {
                bail!("{} failed validation", path.display());
            }
        }
        Command::Run {
            path,
            actor,
            params,
            failsafe,
            permissive,
            ordinal_time,
            no_validate,
            max_rounds,
            max_depth,
        } => {
            let document = ProtocolDocument::load(&path)?;
            let config = EngineConfig {
                failsafe,
                permissive,
                validate: !no_validate,
                ordinal_time,
                max_rounds,
                max_depth,
            };
            let default = DefaultSpecialization::new();
            let records = default.records();
            let mut engine =
                ExecutionEngine::new(document.library(), config).with_specialization(default);

            info!(protocol = %document.protocol.id, %actor, "running protocol");
            let outcome = engine.execute(&document.protocol, &actor, params);
            if let Ok(records) = records.lock() {
                for record in records.iter() {
                    info!(%record, "invocation");
                }
            }
            match outcome {
                Ok(execution) => {
                    println!("{}", serde_json::to_string_pretty(&execution)?);
                    if !execution.completed_normally {
                        warn!("protocol finished without binding every required output");
                    }
                }
                Err(failure) => {
                    println!("{}", serde_json::to_string_pretty(&failure.execution)?);
                    return Err(failure).context("protocol run failed");
                }
            }
        }
    }
    Ok(())
}

// ============================================================
// Unit tests
// ============================================================
#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn run_arguments_parse() {
        let cli = Cli::try_parse_from([
            "protoflow",
            "run",
            "protocol.json",
            "--param",
            "volume=100",
            "--param",
            "label=plate A",
            "--failsafe",
            "--permissive",
            "--max-rounds",
            "50",
        ])
        .expect("valid arguments");
        let Command::Run {
            params,
            failsafe,
            permissive,
            max_rounds,
            max_depth,
            ..
        } = cli.command
        else {
            panic!("expected run");
        };
        assert_eq!(
            params,
            vec![
                ParameterValue::new("volume", json!(100)),
                ParameterValue::new("label", json!("plate A")),
            ]
        );
        assert!(failsafe);
        assert!(permissive);
        assert_eq!(max_rounds, 50);
        assert_eq!(max_depth, 32);
    }

    #[test]
    fn malformed_param_is_rejected() {
        assert!(Cli::try_parse_from(["protoflow", "run", "p.json", "--param", "novalue"]).is_err());
        assert!(parse_param("=1").is_err());
        assert_eq!(
            parse_param("flags={\"fast\":true}"),
            Ok(ParameterValue::new("flags", json!({ "fast": true })))
        );
    }

    fn document() -> ProtocolDocument {
        serde_json::from_value(json!({
            "primitives": [{
                "id": "liquid_handling/Provision",
                "parameters": [
                    { "name": "amount", "type": "volume", "direction": "in" },
                    { "name": "samples", "type": "sample_array", "direction": "out" }
                ]
            }],
            "protocol": {
                "id": "proto/Provision",
                "parameters": [
                    { "name": "amount", "type": "volume", "direction": "in" },
                    { "name": "samples", "type": "sample_array", "direction": "out" }
                ],
                "nodes": [
                    { "id": 0, "kind": { "kind": "initial" } },
                    { "id": 1, "kind": { "kind": "parameter", "parameter": "amount", "direction": "in" } },
                    { "id": 2, "kind": { "kind": "action", "behavior": "liquid_handling/Provision", "pins": [3, 4] } },
                    { "id": 3, "kind": { "kind": "pin", "owner": 2, "parameter": "amount", "role": "input" } },
                    { "id": 4, "kind": { "kind": "pin", "owner": 2, "parameter": "samples", "role": "output" } },
                    { "id": 5, "kind": { "kind": "parameter", "parameter": "samples", "direction": "out" } }
                ],
                "edges": [
                    { "id": 0, "kind": "control", "source": 0, "target": 2 },
                    { "id": 1, "kind": "object", "source": 1, "target": 3 },
                    { "id": 2, "kind": "object", "source": 4, "target": 5 }
                ]
            }
        }))
        .expect("valid document")
    }

    #[test]
    fn document_validates_and_runs() {
        let document = document();
        assert!(validate(&document));

        let config = EngineConfig {
            ordinal_time: true,
            ..EngineConfig::default()
        };
        let execution = ExecutionEngine::new(document.library(), config)
            .execute(
                &document.protocol,
                "tester",
                vec![ParameterValue::new("amount", json!(200))],
            )
            .expect("run succeeds");
        assert!(execution.completed_normally);
        assert_eq!(
            execution.output("samples").map(|v| v["placeholder"].clone()),
            Some(json!("samples"))
        );
    }
}
