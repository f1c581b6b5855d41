//! Ship configuration, TOML on disk. The GM roster and ban list are
//! separate JSON files so the shipgate tooling can regenerate them
//! without touching the ship config.

use hashbrown::HashMap;
use serde_derive::Deserialize;
use std::fs;
use std::path::Path;

/// Listening ports per block: five consecutive dialect ports, plus
/// headroom before the next block's range.
pub const BLOCK_PORT_STRIDE: u16 = 5;

#[derive(Debug, Clone, Deserialize)]
pub struct InfoFileEntry {
    pub title: String,
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PeerShipConfig {
    pub id: u32,
    pub name: String,
    pub ip: [u8; 4],
    pub port: u16,
    #[serde(default)]
    pub menu_code: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ShipConfig {
    pub name: String,
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Address handed to clients in redirects and search replies.
    #[serde(default = "default_external_ip")]
    pub external_ip: [u8; 4],
    pub base_port: u16,
    #[serde(default = "default_blocks")]
    pub blocks: u32,

    #[serde(default)]
    pub event: u8,
    #[serde(default)]
    pub lobby_event: u8,

    #[serde(default)]
    pub motd: String,
    #[serde(default = "default_colorchat")]
    pub colorchat_char: char,

    #[serde(default)]
    pub quest_dir: String,
    #[serde(default)]
    pub quest_file: String,
    #[serde(default)]
    pub gm_file: String,
    #[serde(default)]
    pub ban_file: String,
    #[serde(default)]
    pub limits_name: String,

    #[serde(default)]
    pub info_files: Vec<InfoFileEntry>,
    #[serde(default)]
    pub censor_words: Vec<String>,
    #[serde(default)]
    pub ships: Vec<PeerShipConfig>,
    #[serde(default)]
    pub shipgate_addr: String,
}

fn default_bind() -> String {
    "0.0.0.0".to_string()
}

fn default_external_ip() -> [u8; 4] {
    [127, 0, 0, 1]
}

fn default_blocks() -> u32 {
    2
}

fn default_colorchat() -> char {
    '$'
}

impl ShipConfig {
    pub fn load(path: &Path) -> Result<ShipConfig, String> {
        serdeconv::from_toml_file(path).map_err(|err| err.to_string())
    }

    /// Base (DC) port of a 1-indexed block.
    pub fn block_base_port(&self, block: u32) -> u16 {
        self.base_port + (block as u16 - 1) * BLOCK_PORT_STRIDE
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BanRecord {
    pub guildcard: u32,
    /// Unix seconds; `0` means permanent.
    #[serde(default)]
    pub until: u64,
    #[serde(default)]
    pub reason: String,
}

/// GM roster JSON: guildcard (as string key) to privilege bits.
pub fn load_gm_roster(path: &Path) -> Result<HashMap<u32, u8>, String> {
    let file = fs::File::open(path).map_err(|err| err.to_string())?;
    let raw: HashMap<String, u8> = serde_json::from_reader(file).map_err(|err| err.to_string())?;

    let mut roster = HashMap::new();

    for (key, privilege) in raw {
        let gc: u32 = key.parse().map_err(|_| format!("bad guildcard {:?}", key))?;
        roster.insert(gc, privilege);
    }

    Ok(roster)
}

/// Ban list JSON: an array of ban records.
pub fn load_ban_list(path: &Path) -> Result<HashMap<u32, BanRecord>, String> {
    let file = fs::File::open(path).map_err(|err| err.to_string())?;
    let raw: Vec<BanRecord> = serde_json::from_reader(file).map_err(|err| err.to_string())?;

    Ok(raw.into_iter().map(|ban| (ban.guildcard, ban)).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_parses_with_defaults() {
        let cfg: ShipConfig = serdeconv::from_toml_str(
            r#"
name = "Aurora"
base_port = 12000
"#,
        )
        .unwrap();

        assert_eq!(cfg.name, "Aurora");
        assert_eq!(cfg.blocks, 2);
        assert_eq!(cfg.bind, "0.0.0.0");
        assert_eq!(cfg.colorchat_char, '$');
    }

    #[test]
    fn block_ports_are_disjoint_ranges() {
        let cfg: ShipConfig = serdeconv::from_toml_str(
            r#"
name = "Aurora"
base_port = 12000
blocks = 3
"#,
        )
        .unwrap();

        assert_eq!(cfg.block_base_port(1), 12000);
        assert_eq!(cfg.block_base_port(2), 12005);
        assert_eq!(cfg.block_base_port(3), 12010);
    }

    #[test]
    fn gm_roster_parses_string_keys() {
        let dir = std::env::temp_dir().join("psoship-gmtest");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("gms.json");
        fs::write(&path, r#"{"1000001": 2, "1000002": 12}"#).unwrap();

        let roster = load_gm_roster(&path).unwrap();
        assert_eq!(roster.get(&1000001), Some(&2));
        assert_eq!(roster.get(&1000002), Some(&12));

        fs::remove_file(&path).ok();
    }
}
