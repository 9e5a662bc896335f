pub mod engagement;
pub mod streams;
pub mod wsroute;
