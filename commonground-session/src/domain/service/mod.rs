pub mod session_domain_service;

pub use session_domain_service::SessionDomainService;
