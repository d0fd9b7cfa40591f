mod common;

use std::io::{Read, Write};
use std::net::TcpStream;
use std::time::Duration;

use common::{Harness, client_config, server_config};
use framelock::net::{NAME_LENGTH, SEND_MTU};
use framelock::{
    ClientCloseReason, ClientConfig, ClientEvent, ClientStatus, Command, DisconnectReason,
    ErrorCode, Packet, PacketType, PasswordKind, SERVER_INDEX, SPECTATOR, ServerConfig,
    ServerEvent, Simulation,
};

#[test]
fn test_join_flow() {
    let mut h = Harness::new(server_config());
    let alice = h.join(client_config("alice"));

    let client = h.client(alice);
    assert_eq!(client.index(), Some(2));
    assert_eq!(client.playas(), 0);

    let events = h.events(alice);
    assert!(events.contains(&ClientEvent::Joined { index: 2 }));
    assert!(events.contains(&ClientEvent::ClientInfo {
        index: SERVER_INDEX,
        playas: SPECTATOR,
        name: "Server".into(),
    }));
    assert!(events.iter().any(|e| matches!(e, ClientEvent::MapLoaded { .. })));
    assert!(events.iter().any(|e| matches!(e, ClientEvent::Active { .. })));

    assert!(h
        .server_events
        .iter()
        .any(|e| matches!(e, ServerEvent::ClientJoined { index: 2, name } if name == "alice")));
    assert!(h
        .server_events
        .iter()
        .any(|e| matches!(e, ServerEvent::ClientActive { index: 2 })));

    h.ticks(20);
    assert!(h.settle());
    assert_eq!(h.client(alice).frame(), h.server.frame());
    assert_eq!(
        h.client(alice).simulation().checksum(),
        h.server.simulation().checksum()
    );
}

#[test]
fn test_server_full() {
    let mut h = Harness::new(ServerConfig {
        max_clients: 1,
        ..server_config()
    });
    let first = h.connect(client_config("first"));
    assert!(h.pump_until(|h| h.server.sessions().len() == 1));

    let second = h.connect(client_config("second"));
    assert!(h.pump_until(|h| h.client(second).status().is_closed()));

    assert_eq!(
        h.client(second).status(),
        ClientStatus::Closed(ClientCloseReason::ServerFull)
    );
    assert!(h.events(second).contains(&ClientEvent::ServerFull));
    assert_eq!(h.client(second).stats().packets_received, 1);
    assert!(!h.events(second).iter().any(|e| matches!(
        e,
        ClientEvent::Joined { .. }
            | ClientEvent::Waiting { .. }
            | ClientEvent::MapProgress { .. }
            | ClientEvent::MapLoaded { .. }
    )));
    assert!(h
        .server_events
        .iter()
        .any(|e| matches!(e, ServerEvent::ConnectionRefused { .. })));

    assert!(h.tick_until(|h| h.client(first).status() == ClientStatus::Active));
    assert_eq!(h.server.sessions().len(), 1);
}

#[test]
fn test_wrong_revision_is_rejected() {
    let mut h = Harness::new(server_config());
    let old = h.connect(ClientConfig {
        revision: "0.0.1-old".into(),
        ..client_config("old")
    });

    assert!(h.pump_until(|h| h.client(old).status().is_closed()));
    assert_eq!(
        h.client(old).status(),
        ClientStatus::Closed(ClientCloseReason::Error(ErrorCode::WrongRevision))
    );
    assert!(h.events(old).contains(&ClientEvent::Error(ErrorCode::WrongRevision)));
    assert!(h.pump_until(|h| h.server.sessions().is_empty()));
}

#[test]
fn test_game_password() {
    let mut h = Harness::new(ServerConfig {
        game_password: "secret".into(),
        ..server_config()
    });

    let asker = h.connect(client_config("asker"));
    assert!(h.pump_until(|h| h
        .events(asker)
        .contains(&ClientEvent::PasswordRequired(PasswordKind::Game))));
    assert_eq!(
        h.client(asker).status(),
        ClientStatus::Authorizing(PasswordKind::Game)
    );
    h.client_mut(asker).send_password("secret").unwrap();
    assert!(h.tick_until(|h| h.client(asker).status() == ClientStatus::Active));

    let guesser = h.connect(ClientConfig {
        game_password: "guess".into(),
        ..client_config("guesser")
    });
    assert!(h.pump_until(|h| h.client(guesser).status().is_closed()));
    assert!(h.events(guesser).contains(&ClientEvent::Error(ErrorCode::WrongPassword)));
    assert!(!h
        .events(guesser)
        .iter()
        .any(|e| matches!(e, ClientEvent::Joined { .. })));
}

#[test]
fn test_duplicate_names_are_numbered() {
    let mut h = Harness::new(server_config());
    let a = h.join(client_config("pat"));
    let b = h.join(client_config("pat"));

    let index = h.client(b).index().unwrap();
    assert_eq!(h.client(b).clients()[&index].name, "pat #1");
    assert!(h.pump_until(|h| h
        .client(a)
        .clients()
        .get(&index)
        .is_some_and(|c| c.name == "pat #1")));
}

#[test]
fn test_numbered_names_stay_within_the_limit() {
    let mut h = Harness::new(server_config());
    let long = "n".repeat(NAME_LENGTH);
    let a = h.join(client_config(&long));
    let b = h.join(client_config(&long));

    let first = h.client(a).index().unwrap();
    let second = h.client(b).index().unwrap();
    assert_eq!(h.client(a).clients()[&first].name, long);
    let numbered = &h.client(b).clients()[&second].name;
    assert_eq!(numbered.len(), NAME_LENGTH);
    assert!(numbered.ends_with(" #1"));
    assert!(numbered.starts_with("nnnn"));
}

#[test]
fn test_malformed_packet_only_drops_its_sender() {
    let mut h = Harness::new(server_config());
    let alice = h.join(client_config("alice"));

    let mut raw = TcpStream::connect(h.server.local_addr()).unwrap();
    assert!(h.pump_until(|h| h.server.sessions().len() == 2));

    // declared size below the header size
    raw.write_all(&[2, 0, 1]).unwrap();
    assert!(h.pump_until(|h| h.server.sessions().len() == 1));

    assert!(h.server_events.iter().any(|e| matches!(
        e,
        ServerEvent::ClientDisconnected {
            reason: DisconnectReason::Error(ErrorCode::IllegalPacket),
            ..
        }
    )));

    raw.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
    let mut reply = [0u8; 4];
    raw.read_exact(&mut reply).unwrap();
    assert_eq!(reply, [4, 0, 2, u8::from(ErrorCode::IllegalPacket)]);

    assert!(h.settle());
    let before = h.client(alice).frame();
    h.ticks(10);
    assert!(h.settle());
    assert_eq!(h.client(alice).status(), ClientStatus::Active);
    assert_eq!(h.client(alice).frame(), before + 10);
}

#[test]
fn test_unknown_packet_type_is_malformed() {
    let mut h = Harness::new(server_config());
    let mut raw = TcpStream::connect(h.server.local_addr()).unwrap();
    assert!(h.pump_until(|h| h.server.sessions().len() == 1));

    raw.write_all(&[3, 0, 200]).unwrap();
    assert!(h.pump_until(|h| h.server.sessions().is_empty()));
    assert!(h.server_events.iter().any(|e| matches!(
        e,
        ServerEvent::ClientDisconnected {
            reason: DisconnectReason::Error(ErrorCode::IllegalPacket),
            ..
        }
    )));
}

#[test]
fn test_declared_size_above_mtu_is_malformed() {
    let mut h = Harness::new(server_config());
    let mut raw = TcpStream::connect(h.server.local_addr()).unwrap();
    assert!(h.pump_until(|h| h.server.sessions().len() == 1));

    let size = (SEND_MTU as u16 + 1).to_le_bytes();
    raw.write_all(&[size[0], size[1], u8::from(PacketType::ClientJoin)]).unwrap();
    assert!(h.pump_until(|h| h.server.sessions().is_empty()));
    assert!(h.server_events.iter().any(|e| matches!(
        e,
        ServerEvent::ClientDisconnected {
            reason: DisconnectReason::Error(ErrorCode::IllegalPacket),
            ..
        }
    )));

    raw.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
    let mut reply = [0u8; 4];
    raw.read_exact(&mut reply).unwrap();
    assert_eq!(reply, [4, 0, 2, u8::from(ErrorCode::IllegalPacket)]);
}

#[test]
fn test_raw_command_before_join_is_not_expected() {
    let mut h = Harness::new(server_config());
    let mut raw = TcpStream::connect(h.server.local_addr()).unwrap();
    assert!(h.pump_until(|h| h.server.sessions().len() == 1));

    let mut packet = Packet::new(PacketType::ClientCommand);
    Command::new(0, 1).write_request(&mut packet).unwrap();
    raw.write_all(&packet.into_wire()).unwrap();
    assert!(h.pump_until(|h| h.server.sessions().is_empty()));
    assert!(h.server_events.iter().any(|e| matches!(
        e,
        ServerEvent::ClientDisconnected {
            reason: DisconnectReason::Error(ErrorCode::NotExpected),
            ..
        }
    )));

    raw.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
    let mut reply = [0u8; 4];
    raw.read_exact(&mut reply).unwrap();
    assert_eq!(reply, [4, 0, 2, u8::from(ErrorCode::NotExpected)]);
}

#[test]
fn test_command_before_join_is_refused() {
    let mut h = Harness::new(server_config());
    let early = h.connect(client_config("early"));
    assert!(h.client_mut(early).send_command(&Command::new(0, 1)).is_err());
}

#[test]
fn test_kick() {
    let mut h = Harness::new(server_config());
    let stay = h.join(client_config("stay"));
    let go = h.join(client_config("go"));
    let index = h.client(go).index().unwrap();

    assert!(h.server.kick_client(index));
    assert!(h.pump_until(|h| h.client(go).status().is_closed()));
    assert_eq!(
        h.client(go).status(),
        ClientStatus::Closed(ClientCloseReason::Error(ErrorCode::Kicked))
    );

    assert!(h.pump_until(|h| h.events(stay).iter().any(|e| matches!(
        e,
        ClientEvent::ClientQuit { index: i, .. } if *i == index
    ))));
    assert!(!h.client(stay).clients().contains_key(&index));
    assert!(!h.server.kick_client(index));
}

#[test]
fn test_graceful_quit_is_announced() {
    let mut h = Harness::new(server_config());
    let stay = h.join(client_config("stay"));
    let leave = h.join(client_config("leave"));
    let index = h.client(leave).index().unwrap();

    h.client_mut(leave).quit();
    assert_eq!(
        h.client(leave).status(),
        ClientStatus::Closed(ClientCloseReason::Quit)
    );

    assert!(h.pump_until(|h| h.events(stay).contains(&ClientEvent::ClientQuit {
        index,
        reason: "leaving".into(),
    })));
    assert!(h.server_events.iter().any(|e| matches!(
        e,
        ServerEvent::ClientDisconnected {
            reason: DisconnectReason::Graceful,
            ..
        }
    )));
}

#[test]
fn test_idle_client_times_out() {
    let mut config = server_config();
    config.frame.client_timeout = 30;
    config.frame.lag_pause = 10;
    let mut h = Harness::new(config);

    let idle = h.join(client_config("idle"));
    let idle_index = h.client(idle).index().unwrap();
    let _frozen = h.detach(idle);

    assert!(h.tick_until(|h| h
        .server
        .sessions()
        .find_by_index(idle_index)
        .is_none_or(|s| s.paused)));

    assert!(h.tick_until(|h| h.server.sessions().is_empty()));
    assert!(h.server_events.iter().any(|e| matches!(
        e,
        ServerEvent::ClientDisconnected {
            reason: DisconnectReason::Timeout,
            ..
        }
    )));
}

#[test]
fn test_shutdown_reaches_every_client() {
    let mut h = Harness::new(server_config());
    let a = h.join(client_config("a"));
    let b = h.connect(client_config("b"));
    assert!(h.pump_until(|h| h.client(b).index().is_some()));

    h.server.shutdown_connections();
    assert!(h.pump_until(|h| h.clients.iter().all(|c| c.status().is_closed())));
    for i in [a, b] {
        assert!(h.events(i).contains(&ClientEvent::Shutdown));
        assert_eq!(
            h.client(i).status(),
            ClientStatus::Closed(ClientCloseReason::Shutdown)
        );
    }
    assert!(h.server.sessions().is_empty());
}
