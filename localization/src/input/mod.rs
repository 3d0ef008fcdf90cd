pub mod roadnetwork;
pub mod roadnetwork_parser;
pub mod scenario;
