/// Health check sending a GET request to a status url of the target
pub mod http;
