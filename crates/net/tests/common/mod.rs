#![allow(dead_code)]

use std::thread;
use std::time::{Duration, Instant};

use framelock::discovery::ContentId;
use framelock::sim::WorldInfo;
use framelock::{
    ClientConfig, ClientEvent, ClientStatus, Command, CompanyInfo, GameServer, JournalWorld,
    NetworkClient, NoContent, ServerConfig, ServerEvent, SimError, Simulation,
};

pub const TIMEOUT_MS: u64 = 5000;

/// Journal world that can be made to drift or to save a larger map.
#[derive(Debug, Clone, Default)]
pub struct TestWorld {
    pub world: JournalWorld,
    pub drift_from: Option<u32>,
    pub ballast: usize,
    pub content: Vec<ContentId>,
}

impl TestWorld {
    pub fn drifting(from: u32) -> Self {
        Self {
            drift_from: Some(from),
            ..Self::default()
        }
    }

    pub fn with_ballast(ballast: usize) -> Self {
        Self {
            ballast,
            ..Self::default()
        }
    }
}

impl Simulation for TestWorld {
    fn execute(&mut self, command: &Command) {
        self.world.execute(command);
    }

    fn advance(&mut self, frame: u32) {
        self.world.advance(frame);
    }

    fn checksum(&self) -> u64 {
        let checksum = self.world.checksum();
        match self.drift_from {
            Some(from) if self.world.frame() >= from => checksum ^ 1,
            _ => checksum,
        }
    }

    fn save(&self) -> Result<Vec<u8>, SimError> {
        let mut data = self.world.save()?;
        data.resize(data.len() + self.ballast, b' ');
        Ok(data)
    }

    fn load(&mut self, data: &[u8]) -> Result<(), SimError> {
        self.world.load(data)
    }

    fn world_info(&self) -> WorldInfo {
        self.world.world_info()
    }

    fn companies(&self) -> Vec<CompanyInfo> {
        self.world.companies()
    }

    fn content(&self) -> Vec<ContentId> {
        self.content.clone()
    }
}

pub fn server_config() -> ServerConfig {
    ServerConfig {
        bind: "127.0.0.1".into(),
        port: 0,
        lan_discovery: false,
        ..ServerConfig::default()
    }
}

pub fn client_config(name: &str) -> ClientConfig {
    ClientConfig {
        name: name.into(),
        ..ClientConfig::default()
    }
}

/// Drives one server and its clients from the test thread.
pub struct Harness {
    pub server: GameServer<TestWorld>,
    pub clients: Vec<NetworkClient<TestWorld>>,
    pub client_events: Vec<Vec<ClientEvent>>,
    pub server_events: Vec<ServerEvent>,
}

impl Harness {
    pub fn new(config: ServerConfig) -> Self {
        Self::with_world(config, TestWorld::default())
    }

    pub fn with_world(config: ServerConfig, world: TestWorld) -> Self {
        let server = GameServer::new(config, world, Box::new(NoContent)).unwrap();
        Self {
            server,
            clients: Vec::new(),
            client_events: Vec::new(),
            server_events: Vec::new(),
        }
    }

    pub fn connect(&mut self, config: ClientConfig) -> usize {
        self.connect_with(config, TestWorld::default())
    }

    pub fn connect_with(&mut self, config: ClientConfig, world: TestWorld) -> usize {
        let client = NetworkClient::connect(self.server.local_addr(), config, world).unwrap();
        self.clients.push(client);
        self.client_events.push(Vec::new());
        self.clients.len() - 1
    }

    /// Connects and ticks until the client runs frames in lockstep.
    /// Connects and ticks until the client runs frames in lockstep.
    pub fn join(&mut self, config: ClientConfig) -> usize {
        self.join_with(config, TestWorld::default())
    }

    pub fn join_with(&mut self, config: ClientConfig, world: TestWorld) -> usize {
        let i = self.connect_with(config, world);
        let active = self.tick_until(|h| h.clients[i].status() == ClientStatus::Active);
        assert!(active, "client {} stuck in {:?}", i, self.clients[i].status());
        i
    }

    /// Stops driving client `i` and hands it back.
    pub fn detach(&mut self, i: usize) -> NetworkClient<TestWorld> {
        self.client_events.remove(i);
        self.clients.remove(i)
    }

    pub fn client(&self, i: usize) -> &NetworkClient<TestWorld> {
        &self.clients[i]
    }

    pub fn client_mut(&mut self, i: usize) -> &mut NetworkClient<TestWorld> {
        &mut self.clients[i]
    }

    pub fn events(&self, i: usize) -> &[ClientEvent] {
        &self.client_events[i]
    }

    pub fn pump(&mut self) {
        self.server.poll_network();
        self.server_events.extend(self.server.drain_events());
        for (client, events) in self.clients.iter_mut().zip(&mut self.client_events) {
            let _ = client.update();
            events.extend(client.drain_events());
        }
        thread::sleep(Duration::from_millis(1));
    }

    pub fn tick(&mut self) {
        self.pump();
        self.server.advance_frame();
        self.server_events.extend(self.server.drain_events());
        self.pump();
    }

    pub fn ticks(&mut self, count: u32) {
        for _ in 0..count {
            self.tick();
        }
    }

    pub fn pump_until(&mut self, mut done: impl FnMut(&Harness) -> bool) -> bool {
        let start = Instant::now();
        while start.elapsed() < Duration::from_millis(TIMEOUT_MS) {
            self.pump();
            if done(self) {
                return true;
            }
        }
        false
    }

    pub fn tick_until(&mut self, mut done: impl FnMut(&Harness) -> bool) -> bool {
        let start = Instant::now();
        while start.elapsed() < Duration::from_millis(TIMEOUT_MS) {
            self.tick();
            if done(self) {
                return true;
            }
        }
        false
    }

    /// Pumps without new frames until every open client caught up with
    /// the server.
    pub fn settle(&mut self) -> bool {
        self.pump_until(|h| {
            let frame = h.server.frame();
            h.clients
                .iter()
                .filter(|c| c.status() == ClientStatus::Active)
                .all(|c| c.frame() == frame)
        })
    }
}
