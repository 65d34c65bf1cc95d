//! State cache - A live projection of server, client and company facts
//!
//! Built purely by replaying decoded packets. Packets that introduce a new
//! client or company ask for a follow-up poll, which the session sends.

use std::collections::BTreeMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::Serialize;

use crate::protocol::{
    GameDate, ResponsePacket, TypeCounts, UpdateType, SHARES_MAX_PROTOCOL_VERSION,
    SPECTATOR_COMPANY,
};

/// A connected client
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ClientRecord {
    pub name: String,
    pub address: String,
    pub language: u8,
    pub join_date: Option<GameDate>,
    /// Company the client plays for; 255 while spectating
    pub company: u8,
}

impl ClientRecord {
    pub fn is_spectator(&self) -> bool {
        self.company == SPECTATOR_COMPANY
    }
}

/// A company in the running game
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CompanyRecord {
    pub name: String,
    pub manager: String,
    pub colour: u8,
    pub start_year: u32,
    pub passworded: bool,
    pub ai: bool,
    pub bankruptcy_quarters: u8,
    pub shares: [u8; 4],
    pub money: u64,
    pub loan: u64,
    pub income: i64,
    pub cargo_this_quarter: u16,
    pub cargo_last_quarter: u16,
    pub cargo_previous_quarter: u16,
    pub value_last_quarter: u64,
    pub value_previous_quarter: u64,
    pub performance_last_quarter: u16,
    pub performance_previous_quarter: u16,
    pub vehicles: TypeCounts,
    pub stations: TypeCounts,
}

/// Everything known about the server
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ServerState {
    pub name: String,
    pub version: String,
    pub protocol_version: u8,
    pub dedicated: bool,
    pub map_name: String,
    pub seed: u32,
    pub landscape: u8,
    pub map_width: u16,
    pub map_height: u16,
    pub start_date: Option<GameDate>,
    pub current_date: Option<GameDate>,
    pub clients: BTreeMap<u32, ClientRecord>,
    pub companies: BTreeMap<u8, CompanyRecord>,
}

/// Totals derived from the state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Counts {
    /// All clients, spectators included
    pub clients: usize,
    pub spectators: usize,
    pub companies: usize,
}

impl ServerState {
    pub fn counts(&self) -> Counts {
        Counts {
            clients: self.clients.len(),
            spectators: self.clients.values().filter(|c| c.is_spectator()).count(),
            companies: self.companies.len(),
        }
    }
}

/// A poll the state wants sent after applying a packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FollowUp {
    pub update_type: UpdateType,
    pub id: u32,
}

/// Shared, lock-guarded [`ServerState`]
#[derive(Debug, Default)]
pub struct StateCache {
    inner: RwLock<ServerState>,
}

impl StateCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, ServerState> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, ServerState> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Get a copy of the whole state
    pub fn snapshot(&self) -> ServerState {
        self.read().clone()
    }

    pub fn counts(&self) -> Counts {
        self.read().counts()
    }

    pub fn client(&self, id: u32) -> Option<ClientRecord> {
        self.read().clients.get(&id).cloned()
    }

    pub fn company(&self, id: u8) -> Option<CompanyRecord> {
        self.read().companies.get(&id).cloned()
    }

    /// Merge a packet into the state
    pub fn apply(&self, packet: &ResponsePacket) -> Vec<FollowUp> {
        let mut state = self.write();
        let mut follow_ups = Vec::new();

        match packet {
            ResponsePacket::Protocol { version, .. } => {
                state.protocol_version = *version;
            }
            ResponsePacket::Welcome {
                name,
                version,
                dedicated,
                map_name,
                seed,
                landscape,
                start_date,
                map_width,
                map_height,
            } => {
                state.name = name.clone();
                state.version = version.clone();
                state.dedicated = *dedicated;
                state.map_name = map_name.clone();
                state.seed = *seed;
                state.landscape = *landscape;
                state.start_date = Some(*start_date);
                state.map_width = *map_width;
                state.map_height = *map_height;
            }
            ResponsePacket::Date { current } => {
                state.current_date = Some(*current);
            }
            ResponsePacket::ClientJoin { id } => {
                if state.clients.insert(*id, ClientRecord::default()).is_some() {
                    tracing::warn!("Joining client {} was already known, resetting it", id);
                }
                follow_ups.push(FollowUp {
                    update_type: UpdateType::ClientInfo,
                    id: *id,
                });
            }
            ResponsePacket::ClientInfo {
                id,
                address,
                name,
                language,
                join_date,
                company,
            } => {
                let client = state.clients.entry(*id).or_default();
                client.address = address.clone();
                client.name = name.clone();
                client.language = *language;
                client.join_date = Some(*join_date);
                client.company = *company;
            }
            ResponsePacket::ClientUpdate { id, name, company } => {
                let client = state.clients.entry(*id).or_default();
                client.name = name.clone();
                client.company = *company;
            }
            ResponsePacket::ClientQuit { id } => {
                if state.clients.remove(id).is_none() {
                    tracing::warn!("Leaving client {} was not known, ignoring", id);
                }
            }
            ResponsePacket::CompanyNew { id } => {
                if state.companies.insert(*id, CompanyRecord::default()).is_some() {
                    tracing::info!("New company {} was already known, resetting it", id);
                }
                follow_ups.push(FollowUp {
                    update_type: UpdateType::CompanyInfo,
                    id: *id as u32,
                });
            }
            ResponsePacket::CompanyInfo {
                id,
                name,
                manager,
                colour,
                passworded,
                start_year,
                ai,
            } => {
                let company = state.companies.entry(*id).or_default();
                company.name = name.clone();
                company.manager = manager.clone();
                company.colour = *colour;
                company.passworded = *passworded;
                company.start_year = *start_year;
                company.ai = *ai;
            }
            ResponsePacket::CompanyUpdate {
                id,
                name,
                manager,
                colour,
                passworded,
                bankruptcy_quarters,
                shares,
            } => {
                let keep_shares = state.protocol_version <= SHARES_MAX_PROTOCOL_VERSION;
                let company = state.companies.entry(*id).or_default();
                company.name = name.clone();
                company.manager = manager.clone();
                company.colour = *colour;
                company.passworded = *passworded;
                company.bankruptcy_quarters = *bankruptcy_quarters;
                match shares {
                    Some(shares) if keep_shares => company.shares = *shares,
                    _ => {}
                }
            }
            ResponsePacket::CompanyEconomy {
                id,
                money,
                loan,
                income,
                cargo_this_quarter,
                value_last_quarter,
                performance_last_quarter,
                cargo_last_quarter,
                value_previous_quarter,
                performance_previous_quarter,
                cargo_previous_quarter,
            } => {
                let company = state.companies.entry(*id).or_default();
                company.money = *money;
                company.loan = *loan;
                company.income = *income;
                company.cargo_this_quarter = *cargo_this_quarter;
                company.value_last_quarter = *value_last_quarter;
                company.performance_last_quarter = *performance_last_quarter;
                company.cargo_last_quarter = *cargo_last_quarter;
                company.value_previous_quarter = *value_previous_quarter;
                company.performance_previous_quarter = *performance_previous_quarter;
                company.cargo_previous_quarter = *cargo_previous_quarter;
            }
            ResponsePacket::CompanyStats { id, vehicles, stations } => {
                let company = state.companies.entry(*id).or_default();
                company.vehicles = *vehicles;
                company.stations = *stations;
            }
            ResponsePacket::CompanyRemove { id, reason } => {
                if state.companies.remove(id).is_some() {
                    tracing::info!("Company {} removed ({:?})", id, reason);
                } else {
                    tracing::warn!("Removed company {} was not known ({:?}), ignoring", id, reason);
                }
            }
            _ => {}
        }

        follow_ups
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::CompanyRemoveReason;
    use std::collections::BTreeMap;

    fn client_info(id: u32, company: u8) -> ResponsePacket {
        ResponsePacket::ClientInfo {
            id,
            address: "192.0.2.4".into(),
            name: "bob".into(),
            language: 1,
            join_date: GameDate(712_000),
            company,
        }
    }

    fn company_update(shares: Option<[u8; 4]>) -> ResponsePacket {
        ResponsePacket::CompanyUpdate {
            id: 0,
            name: "Bob & Co".into(),
            manager: "Bob".into(),
            colour: 3,
            passworded: true,
            bankruptcy_quarters: 0,
            shares,
        }
    }

    #[test]
    fn test_client_join_then_quit() {
        let cache = StateCache::new();
        let follow = cache.apply(&ResponsePacket::ClientJoin { id: 5 });
        assert_eq!(follow, vec![FollowUp { update_type: UpdateType::ClientInfo, id: 5 }]);
        assert!(cache.client(5).is_some());

        cache.apply(&ResponsePacket::ClientQuit { id: 5 });
        assert!(cache.client(5).is_none());
    }

    #[test]
    fn test_spectator_counts() {
        let cache = StateCache::new();
        cache.apply(&ResponsePacket::ClientJoin { id: 5 });
        cache.apply(&client_info(5, SPECTATOR_COMPANY));

        let counts = cache.counts();
        assert_eq!(counts.clients, 1);
        assert_eq!(counts.spectators, 1);
        assert_eq!(counts.companies, 0);
    }

    #[test]
    fn test_client_info_idempotent() {
        let cache = StateCache::new();
        cache.apply(&client_info(7, 0));
        let once = cache.snapshot().clients;
        cache.apply(&client_info(7, 0));
        assert_eq!(cache.snapshot().clients, once);
    }

    #[test]
    fn test_partial_update_creates_default() {
        let cache = StateCache::new();
        cache.apply(&ResponsePacket::ClientUpdate { id: 9, name: "new".into(), company: 2 });

        let client = cache.client(9).unwrap();
        assert_eq!(client.name, "new");
        assert_eq!(client.company, 2);
        assert!(client.address.is_empty());
    }

    #[test]
    fn test_quit_of_unknown_client_is_ignored() {
        let cache = StateCache::new();
        assert!(cache.apply(&ResponsePacket::ClientQuit { id: 42 }).is_empty());
        assert_eq!(cache.counts(), Counts::default());
    }

    #[test]
    fn test_company_lifecycle() {
        let cache = StateCache::new();
        let follow = cache.apply(&ResponsePacket::CompanyNew { id: 1 });
        assert_eq!(follow, vec![FollowUp { update_type: UpdateType::CompanyInfo, id: 1 }]);

        cache.apply(&ResponsePacket::CompanyStats {
            id: 1,
            vehicles: TypeCounts { train: 4, ..Default::default() },
            stations: TypeCounts::default(),
        });
        cache.apply(&ResponsePacket::CompanyEconomy {
            id: 1,
            money: 10,
            loan: 20,
            income: -5,
            cargo_this_quarter: 1,
            value_last_quarter: 2,
            performance_last_quarter: 3,
            cargo_last_quarter: 4,
            value_previous_quarter: 5,
            performance_previous_quarter: 6,
            cargo_previous_quarter: 7,
        });

        let company = cache.company(1).unwrap();
        assert_eq!(company.vehicles.train, 4);
        assert_eq!(company.money, 10);
        assert_eq!(company.income, -5);
        assert_eq!(cache.counts().companies, 1);

        cache.apply(&ResponsePacket::CompanyRemove {
            id: 1,
            reason: CompanyRemoveReason::Bankrupt,
        });
        assert!(cache.company(1).is_none());
    }

    #[test]
    fn test_shares_only_on_old_protocols() {
        let cache = StateCache::new();
        cache.apply(&ResponsePacket::Protocol { version: 2, frequencies: BTreeMap::new() });
        cache.apply(&company_update(Some([1, 2, 3, 4])));
        assert_eq!(cache.company(0).unwrap().shares, [1, 2, 3, 4]);

        // an update without shares keeps the last known owners
        cache.apply(&company_update(None));
        assert_eq!(cache.company(0).unwrap().shares, [1, 2, 3, 4]);

        let cache = StateCache::new();
        cache.apply(&ResponsePacket::Protocol { version: 3, frequencies: BTreeMap::new() });
        cache.apply(&company_update(Some([1, 2, 3, 4])));
        let company = cache.company(0).unwrap();
        assert_eq!(company.shares, [0; 4]);
        assert!(company.passworded);
    }

    #[test]
    fn test_company_update_without_shares() {
        let cache = StateCache::new();
        cache.apply(&ResponsePacket::Protocol { version: 3, frequencies: BTreeMap::new() });
        cache.apply(&company_update(None));

        let company = cache.company(0).unwrap();
        assert_eq!(company.name, "Bob & Co");
        assert_eq!(company.colour, 3);
        assert_eq!(company.shares, [0; 4]);
    }

    #[test]
    fn test_welcome_and_date() {
        let cache = StateCache::new();
        cache.apply(&ResponsePacket::Welcome {
            name: "srv".into(),
            version: "14.1".into(),
            dedicated: true,
            map_name: "Random Map".into(),
            seed: 7,
            landscape: 1,
            start_date: GameDate(712_223),
            map_width: 64,
            map_height: 128,
        });
        cache.apply(&ResponsePacket::Date { current: GameDate(712_300) });

        let state = cache.snapshot();
        assert_eq!(state.name, "srv");
        assert!(state.dedicated);
        assert_eq!(state.map_height, 128);
        assert_eq!(state.start_date, Some(GameDate(712_223)));
        assert_eq!(state.current_date, Some(GameDate(712_300)));
    }

    #[test]
    fn test_snapshot_serializes() {
        let cache = StateCache::new();
        cache.apply(&client_info(3, SPECTATOR_COMPANY));
        let json = serde_json::to_value(cache.snapshot()).unwrap();
        assert_eq!(json["clients"]["3"]["name"], "bob");
        assert_eq!(json["clients"]["3"]["company"], 255);
    }
}
