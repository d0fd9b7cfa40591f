mod advertise;
mod client;
mod content;
mod game_info;
mod master;
mod server;
mod server_list;

pub use advertise::{AdvertiseAction, AdvertiseSettings, Advertiser};
pub use client::{DiscoveryClient, NEWGRF_BATCH};
pub use content::{
    ContentId, ContentResolver, MAX_GRF_COUNT, NameCache, NoContent, UNKNOWN_GRF_NAME,
};
pub use game_info::GameInfo;
pub use master::MasterRegistry;
pub use server::{
    DiscoveryServer, detail_packet, newgrfs_packet, register_packet, unregister_packet,
};
pub use server_list::{ContentEntry, ServerEntry, ServerList, SortKey};
