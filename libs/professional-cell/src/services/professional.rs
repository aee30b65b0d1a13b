use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;

use crate::models::{Professional, ProfessionalError};
use crate::store::{ProfessionalDirectory, SupabaseProfessionalStore};

pub struct ProfessionalService {
    directory: Arc<dyn ProfessionalDirectory>,
}

impl ProfessionalService {
    pub fn new(directory: Arc<dyn ProfessionalDirectory>) -> Self {
        Self { directory }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        let store = Arc::new(SupabaseProfessionalStore::new(Arc::new(SupabaseClient::new(config))));
        Self::new(store)
    }

    /// Resolve a professional or fail with `NotFound`. Callers rely on this
    /// running before any slot computation.
    pub async fn get_professional(
        &self,
        professional_id: Uuid,
        auth_token: &str,
    ) -> Result<Professional, ProfessionalError> {
        debug!("Resolving professional {}", professional_id);

        self.directory
            .find_professional(professional_id, auth_token)
            .await?
            .ok_or(ProfessionalError::NotFound)
    }
}
