mod common;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::thread;
use std::time::{Duration, Instant};

use common::{TIMEOUT_MS, TestWorld, server_config};
use framelock::discovery::UNKNOWN_GRF_NAME;
use framelock::sim::{CMD_FOUND_COMPANY, CMD_RENAME_COMPANY};
use framelock::{
    Command, ContentId, DiscoveryClient, GameServer, MasterRegistry, NoContent, REVISION,
    ServerConfig, Simulation, UdpEndpoint,
};

fn lan_server(world: TestWorld, resolver: HashMap<ContentId, String>) -> GameServer<TestWorld> {
    let config = ServerConfig {
        server_name: "lan party".into(),
        lan_discovery: true,
        ..server_config()
    };
    GameServer::new(config, world, Box::new(resolver)).unwrap()
}

fn wait_for(mut step: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < Duration::from_millis(TIMEOUT_MS) {
        if step() {
            return true;
        }
        thread::sleep(Duration::from_millis(1));
    }
    false
}

fn browser() -> DiscoveryClient {
    DiscoveryClient::bind("127.0.0.1:0", REVISION, Box::new(NoContent)).unwrap()
}

#[test]
fn test_direct_query_finds_server() {
    let mut server = lan_server(TestWorld::default(), HashMap::new());
    let addr = server.discovery_addr().unwrap();
    assert_eq!(addr.port(), server.local_addr().port());

    let mut client = browser();
    client.query_server(addr);
    assert!(!client.servers().get(addr).unwrap().online);

    assert!(wait_for(|| {
        server.poll_network();
        client.poll();
        client.servers().get(addr).is_some_and(|e| e.online)
    }));

    let entry = client.servers().get(addr).unwrap();
    assert_eq!(entry.info.server_name, "lan party");
    assert_eq!(entry.info.server_revision, REVISION);
    assert!(entry.version_compatible);
    assert!(entry.compatible);
    assert!(entry.content.is_empty());
    assert!(!entry.info.use_password);
}

#[test]
fn test_detail_info_lists_companies() {
    let mut world = TestWorld::default();
    for id in [0u8, 3] {
        world.execute(&Command::new(id, CMD_FOUND_COMPANY).with_params(id as u32, 0, 0));
    }
    world.execute(&Command::new(3, CMD_RENAME_COMPANY).with_text("Delta Freight"));
    let mut server = lan_server(world, HashMap::new());
    let addr = server.discovery_addr().unwrap();

    let mut client = browser();
    client.request_details(addr);
    assert!(wait_for(|| {
        server.poll_network();
        client.poll();
        client.details(addr).is_some()
    }));

    let details = client.details(addr).unwrap();
    let ids: Vec<u8> = details.iter().map(|c| c.id).collect();
    assert_eq!(ids, vec![0, 3]);
    assert_eq!(details[0].name, "Company 1");
    assert_eq!(details[1].name, "Delta Freight");
}

#[test]
fn test_unknown_content_names_are_learned() {
    let known = ContentId::new(0x0102_0304, [1; 16]);
    let missing = ContentId::new(0x0506_0708, [2; 16]);
    let world = TestWorld {
        content: vec![known, missing],
        ..TestWorld::default()
    };
    let names = HashMap::from([(known, "Trains".to_string()), (missing, "Roads".to_string())]);
    let mut server = lan_server(world, names);
    let addr = server.discovery_addr().unwrap();

    let local = HashMap::from([(known, "Trains".to_string())]);
    let mut client = DiscoveryClient::bind("127.0.0.1:0", REVISION, Box::new(local)).unwrap();
    client.query_server(addr);

    assert!(wait_for(|| {
        server.poll_network();
        client.poll();
        client.names().get(&missing) == Some("Roads")
    }));

    let entry = client.servers().get(addr).unwrap();
    assert!(entry.online);
    assert!(!entry.compatible);
    assert_eq!(entry.content.len(), 2);
    assert!(entry.content[0].found);
    assert_eq!(entry.content[0].name, "Trains");
    assert!(!entry.content[1].found);
    assert_eq!(entry.content[1].name, "Roads");
    assert_ne!(entry.content[1].name, UNKNOWN_GRF_NAME);
}

#[test]
fn test_other_revision_is_flagged() {
    let mut server = lan_server(TestWorld::default(), HashMap::new());
    let addr = server.discovery_addr().unwrap();

    let mut client = DiscoveryClient::bind("127.0.0.1:0", "0.0.1-old", Box::new(NoContent)).unwrap();
    client.query_server(addr);
    assert!(wait_for(|| {
        server.poll_network();
        client.poll();
        client.servers().get(addr).is_some_and(|e| e.online)
    }));

    let entry = client.servers().get(addr).unwrap();
    assert!(!entry.version_compatible);
    assert!(!entry.compatible);
}

fn serve_master(endpoint: &mut UdpEndpoint, registry: &mut MasterRegistry) {
    let Ok(packets) = endpoint.receive() else {
        return;
    };
    for (mut packet, from) in packets {
        if let Ok(replies) = registry.handle(&mut packet, from, Instant::now()) {
            for reply in replies {
                let _ = endpoint.send_to(&reply, from);
            }
        }
    }
}

#[test]
fn test_master_lists_advertised_server() {
    let mut master = UdpEndpoint::bind("127.0.0.1:0").unwrap();
    let master_addr = master.local_addr();
    let mut registry = MasterRegistry::new(Duration::from_secs(60));

    let config = ServerConfig {
        lan_discovery: false,
        advertise: true,
        master: Some(master_addr.to_string()),
        ..server_config()
    };
    let mut server = GameServer::new(config, TestWorld::default(), Box::new(NoContent)).unwrap();
    let game_addr: SocketAddr = server.discovery_addr().unwrap();

    assert!(wait_for(|| {
        server.poll_network();
        server.advance_frame();
        serve_master(&mut master, &mut registry);
        registry.len() == 1
    }));
    assert_eq!(
        registry.servers().next().map(SocketAddr::V4),
        Some(game_addr)
    );

    let mut client = browser();
    client.query_master(master_addr).unwrap();
    assert!(wait_for(|| {
        serve_master(&mut master, &mut registry);
        server.poll_network();
        client.poll();
        client.servers().get(game_addr).is_some_and(|e| e.online)
    }));

    server.shutdown_connections();
    assert!(wait_for(|| {
        server.poll_network();
        serve_master(&mut master, &mut registry);
        registry.is_empty()
    }));
}

#[test]
fn test_master_forgets_silent_servers() {
    let mut registry = MasterRegistry::new(Duration::from_secs(1));
    let packet = framelock::discovery::register_packet(3979).unwrap();
    let mut packet = framelock::Packet::from_wire(packet.into_wire()).unwrap();
    let from: SocketAddr = "10.0.0.7:40000".parse().unwrap();
    let now = Instant::now();
    registry.handle(&mut packet, from, now).unwrap();
    assert_eq!(registry.len(), 1);

    assert_eq!(registry.expire(now + Duration::from_millis(500)), 0);
    assert_eq!(registry.expire(now + Duration::from_secs(2)), 1);
    assert!(registry.is_empty());
}
