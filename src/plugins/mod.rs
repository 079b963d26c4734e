pub mod direct;
pub mod glowfoto;
pub mod http;
pub mod registry;
