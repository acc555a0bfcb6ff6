pub mod request_id;

pub use request_id::{REQUEST_ID_HEADER, forwarded_client_ip, request_id_middleware};
