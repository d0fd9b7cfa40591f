use std::cmp::Ordering;
use std::net::SocketAddr;
use std::time::Instant;

use super::content::ContentId;
use super::game_info::GameInfo;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentEntry {
    pub id: ContentId,
    pub name: String,
    pub found: bool,
}

#[derive(Debug, Clone)]
pub struct ServerEntry {
    pub addr: SocketAddr,
    pub info: GameInfo,
    pub online: bool,
    pub version_compatible: bool,
    pub compatible: bool,
    pub content: Vec<ContentEntry>,
    pub last_seen: Option<Instant>,
}

impl ServerEntry {
    fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            info: GameInfo::default(),
            online: false,
            version_compatible: false,
            compatible: false,
            content: Vec::new(),
            last_seen: None,
        }
    }

    pub fn has_responded(&self) -> bool {
        !self.info.server_revision.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortKey {
    Name,
    Clients,
    MapSize,
    Date,
    Years,
    Joinability,
}

fn by_name(a: &ServerEntry, b: &ServerEntry) -> Ordering {
    a.info
        .server_name
        .to_lowercase()
        .cmp(&b.info.server_name.to_lowercase())
}

fn by_clients(a: &ServerEntry, b: &ServerEntry) -> Ordering {
    a.info
        .clients_on
        .cmp(&b.info.clients_on)
        .then(a.info.clients_max.cmp(&b.info.clients_max))
        .then_with(|| by_name(a, b))
}

fn by_map_size(a: &ServerEntry, b: &ServerEntry) -> Ordering {
    a.info
        .map_area()
        .cmp(&b.info.map_area())
        .then(a.info.map_width.cmp(&b.info.map_width))
        .then_with(|| by_clients(a, b))
}

fn by_date(a: &ServerEntry, b: &ServerEntry) -> Ordering {
    a.info
        .game_date
        .cmp(&b.info.game_date)
        .then_with(|| by_name(a, b))
}

fn by_years(a: &ServerEntry, b: &ServerEntry) -> Ordering {
    let years = |e: &ServerEntry| e.info.game_date.saturating_sub(e.info.start_date);
    years(a).cmp(&years(b)).then_with(|| by_name(a, b))
}

/// Servers that never answered sink to the bottom; among the rest, joinable
/// ones come first.
fn by_joinability(a: &ServerEntry, b: &ServerEntry) -> Ordering {
    b.has_responded()
        .cmp(&a.has_responded())
        .then(b.version_compatible.cmp(&a.version_compatible))
        .then(b.compatible.cmp(&a.compatible))
        .then(a.info.use_password.cmp(&b.info.use_password))
        .then_with(|| by_name(a, b))
}

/// Known servers, one entry per address.
#[derive(Debug, Default)]
pub struct ServerList {
    entries: Vec<ServerEntry>,
}

impl ServerList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, addr: SocketAddr) -> Option<&ServerEntry> {
        self.entries.iter().find(|e| e.addr == addr)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ServerEntry> {
        self.entries.iter()
    }

    pub fn entry(&mut self, addr: SocketAddr) -> &mut ServerEntry {
        let position = match self.entries.iter().position(|e| e.addr == addr) {
            Some(position) => position,
            None => {
                self.entries.push(ServerEntry::new(addr));
                self.entries.len() - 1
            }
        };
        &mut self.entries[position]
    }

    pub fn remove(&mut self, addr: SocketAddr) -> Option<ServerEntry> {
        let position = self.entries.iter().position(|e| e.addr == addr)?;
        Some(self.entries.remove(position))
    }

    pub fn mark_all_offline(&mut self) {
        for entry in &mut self.entries {
            entry.online = false;
        }
    }

    pub fn rename_content(&mut self, id: ContentId, name: &str) -> usize {
        let mut renamed = 0;
        for content in self
            .entries
            .iter_mut()
            .flat_map(|e| e.content.iter_mut())
            .filter(|c| c.id == id && !c.found)
        {
            content.name = name.to_string();
            renamed += 1;
        }
        renamed
    }

    pub fn sorted(&self, key: SortKey, descending: bool) -> Vec<&ServerEntry> {
        let compare: fn(&ServerEntry, &ServerEntry) -> Ordering = match key {
            SortKey::Name => by_name,
            SortKey::Clients => by_clients,
            SortKey::MapSize => by_map_size,
            SortKey::Date => by_date,
            SortKey::Years => by_years,
            SortKey::Joinability => by_joinability,
        };

        let mut sorted: Vec<&ServerEntry> = self.entries.iter().collect();
        sorted.sort_by(|a, b| {
            let order = compare(a, b);
            if descending { order.reverse() } else { order }
        });
        sorted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn add<'a>(list: &'a mut ServerList, port: u16, name: &str) -> &'a mut ServerEntry {
        let entry = list.entry(SocketAddr::from(([127, 0, 0, 1], port)));
        entry.info.server_name = name.into();
        entry.info.server_revision = "1.0".into();
        entry.online = true;
        entry.version_compatible = true;
        entry.compatible = true;
        entry
    }

    fn names(sorted: Vec<&ServerEntry>) -> Vec<&str> {
        sorted.into_iter().map(|e| e.info.server_name.as_str()).collect()
    }

    #[test]
    fn test_entries_are_deduplicated_by_address() {
        let mut list = ServerList::new();
        add(&mut list, 1, "a");
        add(&mut list, 1, "b");
        add(&mut list, 2, "c");

        assert_eq!(list.len(), 2);
        assert_eq!(
            list.get(SocketAddr::from(([127, 0, 0, 1], 1))).unwrap().info.server_name,
            "b"
        );
    }

    #[test]
    fn test_name_sort_ignores_case() {
        let mut list = ServerList::new();
        add(&mut list, 1, "beta");
        add(&mut list, 2, "Alpha");
        add(&mut list, 3, "gamma");

        assert_eq!(names(list.sorted(SortKey::Name, false)), vec!["Alpha", "beta", "gamma"]);
        assert_eq!(names(list.sorted(SortKey::Name, true)), vec!["gamma", "beta", "Alpha"]);
    }

    #[test]
    fn test_clients_sort_breaks_ties() {
        let mut list = ServerList::new();
        add(&mut list, 1, "big").info.clients_max = 20;
        add(&mut list, 2, "small").info.clients_max = 5;
        let busy = add(&mut list, 3, "busy");
        busy.info.clients_on = 3;

        assert_eq!(names(list.sorted(SortKey::Clients, false)), vec!["small", "big", "busy"]);
    }

    #[test]
    fn test_joinability_order() {
        let mut list = ServerList::new();
        add(&mut list, 1, "locked").info.use_password = true;
        add(&mut list, 2, "missing content").compatible = false;
        add(&mut list, 3, "old").version_compatible = false;
        list.entry(SocketAddr::from(([127, 0, 0, 1], 4)));
        add(&mut list, 5, "open");

        assert_eq!(
            names(list.sorted(SortKey::Joinability, false)),
            vec!["open", "locked", "missing content", "old", ""]
        );
    }

    #[test]
    fn test_map_size_and_years() {
        let mut list = ServerList::new();
        let wide = add(&mut list, 1, "wide");
        wide.info.map_width = 1024;
        wide.info.map_height = 32;
        wide.info.game_date = 800;
        let square = add(&mut list, 2, "square");
        square.info.map_width = 256;
        square.info.map_height = 256;
        square.info.start_date = 100;
        square.info.game_date = 1000;

        assert_eq!(names(list.sorted(SortKey::MapSize, false)), vec!["wide", "square"]);
        assert_eq!(names(list.sorted(SortKey::Years, false)), vec!["wide", "square"]);
        assert_eq!(names(list.sorted(SortKey::Date, true)), vec!["square", "wide"]);
    }
}
