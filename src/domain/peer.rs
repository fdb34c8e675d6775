//! Peer host records and the reference data they point to

use serde::Serialize;

/// Identity of a host record: either persisted or still a form candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HostId {
    #[default]
    Unsaved,
    Saved(i32),
}

impl HostId {
    pub fn get(self) -> Option<i32> {
        match self {
            HostId::Saved(id) => Some(id),
            HostId::Unsaved => None,
        }
    }
}

impl Serialize for HostId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            HostId::Saved(id) => serializer.serialize_i32(*id),
            HostId::Unsaved => serializer.serialize_none(),
        }
    }
}

/// A remote site trusted for federated exchange.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PeerRecord {
    pub id: HostId,
    pub wwwroot: String,
    pub name: String,
    pub application_id: i32,
    pub public_key: Option<String>,
    pub public_key_expires: Option<i64>,
    pub deleted: bool,
    pub ip_address: Option<String>,
    pub portno: i32,
    pub last_connect_time: Option<i64>,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
}

impl PeerRecord {
    /// Fresh, unsaved record for a host seen for the first time.
    pub fn candidate(wwwroot: String, name: String, application_id: i32, portno: i32) -> Self {
        Self {
            id: HostId::Unsaved,
            wwwroot,
            name,
            application_id,
            public_key: None,
            public_key_expires: None,
            deleted: false,
            ip_address: None,
            portno,
            last_connect_time: None,
            created_at: None,
            updated_at: None,
        }
    }

    pub fn is_active(&self) -> bool {
        !self.deleted
    }
}

/// Application a peer runs (read-only reference data).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Application {
    pub id: i32,
    pub name: String,
    pub display_name: String,
    pub xmlrpc_server_url: String,
}

/// Row of the host directory: a host joined with its application.
#[derive(Debug, Clone, Serialize)]
pub struct PeerListing {
    pub id: i32,
    pub wwwroot: String,
    pub ip_address: Option<String>,
    pub name: String,
    pub public_key: Option<String>,
    pub public_key_expires: Option<i64>,
    pub portno: i32,
    pub last_connect_time: Option<i64>,
    pub application_id: i32,
    pub app_name: String,
    pub app_display_name: String,
    pub xmlrpc_server_url: String,
}

/// Either a bare id or a record the caller already loaded.
#[derive(Debug, Clone)]
pub enum HostRef {
    Id(i32),
    Loaded(Box<PeerRecord>),
}

impl From<i32> for HostRef {
    fn from(id: i32) -> Self {
        HostRef::Id(id)
    }
}

impl From<PeerRecord> for HostRef {
    fn from(record: PeerRecord) -> Self {
        HostRef::Loaded(Box::new(record))
    }
}

/// Keys of the mnet settings table
pub mod settings {
    pub const REGISTER_ALL_HOSTS: &str = "mnet_register_allhosts";
    pub const LOCALHOST_ID: &str = "mnet_localhost_id";
    pub const ALL_HOSTS_ID: &str = "mnet_all_hosts_id";
}
