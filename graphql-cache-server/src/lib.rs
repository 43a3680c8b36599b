pub mod api;
pub mod rules;
pub mod upstream;

pub use api::{router, ApiServer, ApiServerConfig, AuthState, Identity, JwtAuth};
pub use rules::RuleFile;
pub use upstream::HttpExecutor;
