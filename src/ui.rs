//! Interface de terminal do Gatehouse — spinner e saída colorida.
//!
//! Usa `indicatif` para o spinner e `console` para as cores. O
//! [`PipelineProgress`] acompanha uma instância até ela terminar ou parar em
//! um portão. Tudo vai para stderr; stdout fica reservado ao JSON final.

use console::{Style, Term};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

use gatehouse::{PipelineKind, PipelineState, PipelineStatus};

/// Indicador visual de progresso de uma instância.
///
/// Verde para conclusão, vermelho para falha e amarelo para espera ou
/// encerramento.
pub struct PipelineProgress {
    pb: ProgressBar,
    green: Style,
    red: Style,
    yellow: Style,
    term: Term,
}

impl PipelineProgress {
    /// Inicia o spinner para a instância `instance_id`.
    pub fn start(kind: PipelineKind, instance_id: &str) -> Self {
        let pb = ProgressBar::with_draw_target(None, ProgressDrawTarget::stderr());
        if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}") {
            pb.set_style(style);
        }
        pb.set_message(format!("{kind} {instance_id}: pending"));
        pb.enable_steady_tick(std::time::Duration::from_millis(100));

        Self {
            pb,
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
            yellow: Style::new().yellow(),
            term: Term::stderr(),
        }
    }

    /// Atualiza a mensagem com o status e o estágio atuais.
    pub fn update(&self, state: &PipelineState) {
        self.pb.set_message(format!(
            "{} {}: {} @ {}",
            state.pipeline, state.instance_id, state.status, state.current_stage
        ));
    }

    /// Finaliza o spinner e exibe o desfecho.
    pub fn finish(&self, state: &PipelineState) {
        self.pb.finish_and_clear();
        let line = match state.status {
            PipelineStatus::Complete => format!(
                "  {} {} complete ({} events)",
                self.green.apply_to("✓"),
                state.pipeline,
                state.history.len()
            ),
            PipelineStatus::Failed => format!(
                "  {} {} failed at {}: {}",
                self.red.apply_to("✗"),
                state.pipeline,
                state.current_stage,
                state.error.as_deref().unwrap_or("unknown error")
            ),
            status => format!(
                "  {} {} {status} at {}",
                self.yellow.apply_to("⏸"),
                state.pipeline,
                state.current_stage
            ),
        };
        let _ = self.term.write_line(&line);
    }

    /// Avisa que a instância ficou parada sem sinal pendente.
    pub fn stalled(&self, state: &PipelineState) {
        let _ = self.term.write_line(&format!(
            "  {} {} is {} at {} and no signal was supplied; terminating",
            self.yellow.apply_to("!"),
            state.instance_id,
            state.status,
            state.current_stage
        ));
    }
}
