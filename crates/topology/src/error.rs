/// Errors that end a pass before any eviction is dispatched.
#[derive(Debug, thiserror::Error)]
pub enum PassError {
    #[error("listing nodes: {0:#}")]
    ListNodes(anyhow::Error),
    #[error("listing namespaces: {0:#}")]
    ListNamespaces(anyhow::Error),
    #[error("pass cancelled")]
    Cancelled,
}
