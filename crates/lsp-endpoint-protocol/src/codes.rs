// Standard JSON-RPC error codes
pub const PARSE_ERROR: i32 = -32700;
pub const INVALID_REQUEST: i32 = -32600;
pub const METHOD_NOT_FOUND: i32 = -32601;
pub const INVALID_PARAMS: i32 = -32602;
pub const INTERNAL_ERROR: i32 = -32603;

/// Lower bound of the range reserved for implementation-defined server errors.
pub const SERVER_ERROR_START: i32 = -32099;
/// Upper bound of the range reserved for implementation-defined server errors.
pub const SERVER_ERROR_END: i32 = -32000;

// Language Server Protocol codes
pub const SERVER_NOT_INITIALIZED: i32 = -32002;
pub const UNKNOWN_ERROR_CODE: i32 = -32001;
pub const REQUEST_CANCELLED: i32 = -32800;
pub const CONTENT_MODIFIED: i32 = -32801;

/// Whether `code` falls in the implementation-defined server error range.
pub fn is_server_error(code: i32) -> bool {
    (SERVER_ERROR_START..=SERVER_ERROR_END).contains(&code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_error_range() {
        assert!(is_server_error(SERVER_NOT_INITIALIZED));
        assert!(is_server_error(UNKNOWN_ERROR_CODE));
        assert!(is_server_error(SERVER_ERROR_START));
        assert!(is_server_error(SERVER_ERROR_END));
        assert!(!is_server_error(METHOD_NOT_FOUND));
        assert!(!is_server_error(REQUEST_CANCELLED));
        assert!(!is_server_error(1));
    }
}
