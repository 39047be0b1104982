/// Authenticated REST access
pub mod pipeline;
pub mod refresh;
pub mod transport;

pub use pipeline::{ApiClient, ApiRequest, LoginResponse};
pub use refresh::{RefreshCoordinator, RenewalError};
pub use transport::{HttpRequest, HttpResponse, HttpTransport, ReqwestTransport};
