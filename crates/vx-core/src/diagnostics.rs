pub mod commands {
    pub const FIND: &str = "VX101";
    pub const LIST: &str = "VX102";
    pub const STORE: &str = "VX110";
    pub const REMOVE: &str = "VX111";
    pub const CLEAN: &str = "VX120";
    pub const GENERIC: &str = "VX000";
}

pub mod cache {
    pub const IO_FAILURE: &str = "VX800";
    pub const ENCODE_FAILURE: &str = "VX801";
    pub const DUPLICATE_ENV: &str = "VX802";
    pub const LOCK_FAILURE: &str = "VX810";
    pub const LOCK_UNSUPPORTED: &str = "VX811";
    pub const TIMESTAMP_FAILURE: &str = "VX820";
}
