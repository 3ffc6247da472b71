use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;
use crate::{
    config::AppConfig,
    llm::LanguageModel,
    prompts::LensSelector,
    session::{Session, SharedSession},
};

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub llm: Arc<dyn LanguageModel>,
    pub lens: Arc<dyn LensSelector>,
    pub session: SharedSession,
    pub status: Arc<Mutex<Status>>,
    pub shutdown_sender: Arc<Mutex<Option<oneshot::Sender<()>>>>,
}

/// Texto del indicador de progreso que consulta el frontend.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct Status {
    pub is_busy: bool,
    pub message: String,
}

impl AppState {
    /// Crea el estado y devuelve el receptor de la señal de apagado.
    pub fn new(
        config: AppConfig,
        llm: Arc<dyn LanguageModel>,
        lens: Arc<dyn LensSelector>,
    ) -> (Self, oneshot::Receiver<()>) {
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let state = Self {
            config,
            llm,
            lens,
            session: Session::shared(),
            status: Arc::new(Mutex::new(Status {
                is_busy: false,
                message: "Servidor listo.".to_string(),
            })),
            shutdown_sender: Arc::new(Mutex::new(Some(shutdown_tx))),
        };
        (state, shutdown_rx)
    }

    pub fn set_status(&self, is_busy: bool, message: impl Into<String>) {
        let mut status = self.status.lock().unwrap();
        status.is_busy = is_busy;
        status.message = message.into();
    }
}

#[cfg(test)]
pub fn test_state(model: Arc<crate::llm::mock::MockModel>) -> AppState {
    let config = AppConfig::from_lookup(|_| None).unwrap();
    let (state, _shutdown_rx) = AppState::new(config, model, Arc::new(crate::prompts::FixedLens(0)));
    state
}
