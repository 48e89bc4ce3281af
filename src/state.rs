use crate::access::AccessPolicy;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState<P> {
    pub(crate) puller: P,
    pub(crate) access: Arc<AccessPolicy>,
}
