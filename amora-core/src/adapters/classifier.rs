use async_trait::async_trait;

use amora_shared::clients::classifier::{ClassifierClient, ClassifierError, ClassifierVerdict};

use crate::ports::*;

#[derive(Clone)]
pub struct HttpClassifier {
    client: ClassifierClient,
}

impl HttpClassifier {
    pub fn new(client: ClassifierClient) -> Self {
        Self { client }
    }
}

fn port_error(e: ClassifierError) -> PortError {
    match e {
        ClassifierError::Timeout => PortError::Timeout,
        ClassifierError::Unavailable(msg) => PortError::Unavailable(msg),
    }
}

#[async_trait]
impl ContentClassifier for HttpClassifier {
    async fn classify_text(&self, text: &str) -> Result<ClassifierVerdict, PortError> {
        self.client.classify_text(text).await.map_err(port_error)
    }

    async fn classify_image(&self, object_key: &str) -> Result<ClassifierVerdict, PortError> {
        self.client.classify_image(object_key).await.map_err(port_error)
    }
}
