//! Interface de linha de comando do Gatehouse baseada em clap.
//!
//! Define a struct [`Cli`] com subcomandos [`Command`] (blocks, migrate,
//! bootstrap) e flags globais (--config, --verbose). Cada subcomando aceita um
//! payload JSON e os sinais a entregar à instância ([`SignalArgs`]).

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use serde_json::{Map, Value};

/// Gatehouse — pipelines de automação retomáveis com portões de aprovação.
#[derive(Debug, Parser)]
#[command(name = "gatehouse", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Caminho do arquivo de configuração (padrão: ./gatehouse.toml).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Habilita saída detalhada (verbose).
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Executa o pipeline de blocos B1..B8.
    Blocks {
        #[command(flatten)]
        payload: PayloadArgs,

        /// Identificador da tarefa.
        #[arg(long)]
        task_id: Option<String>,

        /// Pausa antes de cada bloco até receber um sinal de avanço.
        #[arg(long, default_value_t = false)]
        step_mode: bool,

        #[command(flatten)]
        signals: SignalArgs,
    },

    /// Executa a migração ETL (extract, transform, load, validate, report).
    Migrate {
        #[command(flatten)]
        payload: PayloadArgs,

        /// Identificador da migração (usado no nome do relatório).
        #[arg(long)]
        migration_id: Option<String>,

        /// Grava de fato no destino (padrão: dry run).
        #[arg(long, default_value_t = false)]
        execute: bool,

        /// Fase a partir da qual retomar: extract, transform, load ou validate.
        #[arg(long)]
        resume_from: Option<String>,

        /// Arquivo de origem (JSON ou CSV), relativo ao repo_root.
        #[arg(long)]
        source_path: Option<String>,

        /// Formato explícito do arquivo de origem.
        #[arg(long)]
        source_format: Option<String>,

        /// Modo de origem: inline, file ou connector.
        #[arg(long)]
        source_mode: Option<String>,
    },

    /// Executa o pipeline de self-bootstrap.
    Bootstrap {
        #[command(flatten)]
        payload: PayloadArgs,

        /// Identificador da tarefa do roadmap.
        #[arg(long)]
        roadmap_task_id: Option<String>,

        #[command(flatten)]
        signals: SignalArgs,
    },
}

/// Payload de início comum a todos os subcomandos.
#[derive(Debug, Clone, Args)]
pub struct PayloadArgs {
    /// Payload de início em JSON (padrão: `{}`).
    #[arg(long)]
    pub payload_json: Option<String>,

    /// Raiz do repositório onde os artefatos são gravados.
    #[arg(long)]
    pub repo_root: Option<String>,

    /// Diretório de saída, relativo ao repo_root.
    #[arg(long)]
    pub output_dir: Option<String>,
}

/// Sinais entregues à instância logo após o início.
#[derive(Debug, Clone, Default, Args)]
pub struct SignalArgs {
    /// Aprova o portão de aprovação com esta nota.
    #[arg(long)]
    pub approve_note: Option<String>,

    /// Libera o portão de paridade de docs com este caminho de evidência.
    #[arg(long)]
    pub docs_parity: Option<String>,

    /// Quantidade de sinais de avanço (modo passo a passo).
    #[arg(long, default_value_t = 0)]
    pub advance: u32,
}

impl PayloadArgs {
    /// Interpreta `--payload-json` e sobrepõe as flags informadas.
    ///
    /// Payloads que não são objetos seguem intactos; a validação do pipeline
    /// os rejeita.
    pub fn build(&self, overrides: &[(&str, Option<Value>)]) -> anyhow::Result<Value> {
        let mut payload = match &self.payload_json {
            Some(raw) => serde_json::from_str::<Value>(raw)?,
            None => Value::Object(Map::new()),
        };
        if let Some(object) = payload.as_object_mut() {
            let common = [
                ("repo_root", self.repo_root.clone().map(Value::String)),
                ("output_dir", self.output_dir.clone().map(Value::String)),
            ];
            for (key, value) in common.iter().chain(overrides) {
                if let Some(value) = value {
                    object.insert((*key).to_string(), value.clone());
                }
            }
        }
        Ok(payload)
    }
}

impl Command {
    /// Monta o payload de início do subcomando.
    pub fn payload(&self) -> anyhow::Result<Value> {
        let text = |v: &Option<String>| v.clone().map(Value::String);
        match self {
            Command::Blocks {
                payload,
                task_id,
                step_mode,
                ..
            } => payload.build(&[
                ("task_id", text(task_id)),
                ("step_mode", step_mode.then_some(Value::Bool(true))),
            ]),
            Command::Migrate {
                payload,
                migration_id,
                execute,
                resume_from,
                source_path,
                source_format,
                source_mode,
            } => payload.build(&[
                ("migration_id", text(migration_id)),
                ("dry_run", execute.then_some(Value::Bool(false))),
                ("resume_from_checkpoint", text(resume_from)),
                ("source_path", text(source_path)),
                ("source_format", text(source_format)),
                ("source_mode", text(source_mode)),
            ]),
            Command::Bootstrap {
                payload,
                roadmap_task_id,
                ..
            } => payload.build(&[("roadmap_task_id", text(roadmap_task_id))]),
        }
    }

    /// Sinais a entregar; a migração não aceita nenhum.
    pub fn signals(&self) -> SignalArgs {
        match self {
            Command::Blocks { signals, .. } | Command::Bootstrap { signals, .. } => signals.clone(),
            Command::Migrate { .. } => SignalArgs::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use serde_json::json;

    #[test]
    fn cli_parses_blocks_subcommand() {
        let cli = Cli::parse_from([
            "gatehouse",
            "blocks",
            "--task-id",
            "T-1",
            "--step-mode",
            "--advance",
            "3",
            "--approve-note",
            "lgtm",
        ]);
        let signals = cli.command.signals();
        assert_eq!(signals.advance, 3);
        assert_eq!(signals.approve_note.as_deref(), Some("lgtm"));
        let payload = cli.command.payload().unwrap();
        assert_eq!(payload["task_id"], "T-1");
        assert_eq!(payload["step_mode"], true);
    }

    #[test]
    fn cli_parses_global_flags() {
        let cli = Cli::parse_from([
            "gatehouse",
            "--config",
            "custom.toml",
            "--verbose",
            "bootstrap",
        ]);
        assert!(cli.verbose);
        assert_eq!(cli.config, Some(PathBuf::from("custom.toml")));
        assert!(matches!(cli.command, Command::Bootstrap { .. }));
    }

    #[test]
    fn migrate_flags_override_payload_json() {
        let cli = Cli::parse_from([
            "gatehouse",
            "migrate",
            "--payload-json",
            r#"{"dry_run": true, "sample_verify_count": 3}"#,
            "--execute",
            "--resume-from",
            "load",
        ]);
        let payload = cli.command.payload().unwrap();
        assert_eq!(payload["dry_run"], false);
        assert_eq!(payload["sample_verify_count"], 3);
        assert_eq!(payload["resume_from_checkpoint"], "load");
        assert!(payload.get("source_path").is_none());
    }

    #[test]
    fn migrate_defaults_to_empty_payload() {
        let cli = Cli::parse_from(["gatehouse", "migrate"]);
        assert_eq!(cli.command.payload().unwrap(), json!({}));
        assert_eq!(cli.command.signals().advance, 0);
    }

    #[test]
    fn migrate_rejects_signal_flags() {
        assert!(Cli::try_parse_from(["gatehouse", "migrate", "--approve-note", "x"]).is_err());
    }

    #[test]
    fn invalid_payload_json_is_an_error() {
        let cli = Cli::parse_from(["gatehouse", "bootstrap", "--payload-json", "{not json"]);
        assert!(cli.command.payload().is_err());
    }

    #[test]
    fn non_object_payload_passes_through() {
        let cli = Cli::parse_from(["gatehouse", "blocks", "--payload-json", "[1]", "--task-id", "x"]);
        assert_eq!(cli.command.payload().unwrap(), json!([1]));
    }

    #[test]
    fn cli_verify() {
        Cli::command().debug_assert();
    }
}
