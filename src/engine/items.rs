//! Logical item names persisted by the store

pub const PRIVATE_KEY: &str = "key.der";
pub const PUBLIC_KEY: &str = "pubkey.der";
pub const DEPLOYMENT_DATA: &str = "deployment-data.json";
pub const UPDATE_STATE: &str = "um_state.dat";
pub const PROVIDES: &str = "provides.txt";
pub const ARTIFACT_NAME: &str = "artifact_name.txt";

pub const ALL: [&str; 6] = [
    PRIVATE_KEY,
    PUBLIC_KEY,
    DEPLOYMENT_DATA,
    UPDATE_STATE,
    PROVIDES,
    ARTIFACT_NAME,
];
