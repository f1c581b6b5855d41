//! Quest catalog: qid → per-(version, language) descriptors, category
//! listing filters and the language fallback chain used for both
//! listing and delivery.
//!
//! The catalog file is TOML; quest file payloads live on disk under
//! `<quest_dir>/<version_code>-<language_code>/<prefix>.{bin,dat}` for
//! the raw pair format, or `<prefix>.qst` for the container format.

use crate::version::{Version, LANGUAGE_CODES, LANG_COUNT, LANG_ENGLISH, VERSION_COUNT};
use hashbrown::HashMap;
use serde_derive::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuestFormat {
    /// Raw `.bin` + `.dat` pair, chunked by the server.
    BinDat,
    /// Prepackaged container, streamed as-is.
    Qst,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CategoryType {
    Normal,
    Battle,
    Challenge,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QuestCategory {
    pub id: u32,
    #[serde(rename = "type")]
    pub ctype: CategoryType,
    pub name: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone)]
pub struct QuestDescriptor {
    pub qid: u32,
    pub category: u32,
    pub name: String,
    pub short_desc: String,
    pub long_desc: String,
    pub prefix: String,
    pub format: QuestFormat,
    pub episode: u8,
    pub event_mask: u32,
    pub min_players: u8,
    pub max_players: u8,
}

#[derive(Debug, Clone, Deserialize)]
struct QuestConfigEntry {
    id: u32,
    category: u32,
    name: String,
    #[serde(default)]
    short: String,
    #[serde(default)]
    long: String,
    prefix: String,
    format: QuestFormat,
    #[serde(default = "default_episode")]
    episode: u8,
    #[serde(default = "default_event_mask")]
    event_mask: u32,
    #[serde(default = "default_min_players")]
    min_players: u8,
    #[serde(default = "default_max_players")]
    max_players: u8,
    versions: Vec<String>,
    languages: Vec<String>,
}

fn default_episode() -> u8 {
    1
}

fn default_event_mask() -> u32 {
    0xFFFF_FFFF
}

fn default_min_players() -> u8 {
    1
}

fn default_max_players() -> u8 {
    4
}

#[derive(Debug, Clone, Deserialize)]
pub struct QuestConfig {
    #[serde(default)]
    categories: Vec<QuestCategory>,
    #[serde(default)]
    quests: Vec<QuestConfigEntry>,
}

/// Per-quest descriptor grid, one cell per (version, language).
#[derive(Default)]
pub struct QuestMapEntry {
    qptr: [[Option<Arc<QuestDescriptor>>; LANG_COUNT]; VERSION_COUNT],
}

impl QuestMapEntry {
    #[inline]
    pub fn get(&self, version: Version, lang: u8) -> Option<&Arc<QuestDescriptor>> {
        self.qptr[version.index()]
            .get(lang as usize)
            .and_then(|cell| cell.as_ref())
    }

    /// True if the quest exists for the version in any language.
    pub fn available_for(&self, version: Version) -> bool {
        self.qptr[version.index()].iter().any(|cell| cell.is_some())
    }
}

/// The language chain tried for one lobby member, in order.
pub fn language_chain(q_lang: u8, char_lang: u8, leader_lang: u8) -> [u8; 4] {
    [q_lang, char_lang, LANG_ENGLISH, leader_lang]
}

pub struct QuestCatalog {
    pub categories: Vec<QuestCategory>,
    map: HashMap<u32, QuestMapEntry>,
    pub dir: PathBuf,
}

fn version_code_index(code: &str) -> Option<usize> {
    ["v1", "v2", "pc", "gc", "e3", "bb"]
        .iter()
        .position(|&c| c == code)
}

fn language_code_index(code: &str) -> Option<usize> {
    LANGUAGE_CODES.iter().position(|&c| c == code)
}

impl QuestCatalog {
    pub fn empty() -> QuestCatalog {
        QuestCatalog {
            categories: Vec::new(),
            map: HashMap::new(),
            dir: PathBuf::new(),
        }
    }

    /// Parse a catalog from its TOML file. Failures leave the previous
    /// catalog in place at the call site, so errors come back as text.
    pub fn load(path: &Path, dir: &Path) -> Result<QuestCatalog, String> {
        let config: QuestConfig =
            serdeconv::from_toml_file(path).map_err(|err| err.to_string())?;

        Ok(Self::from_config(config, dir))
    }

    pub fn from_config(config: QuestConfig, dir: &Path) -> QuestCatalog {
        let mut map: HashMap<u32, QuestMapEntry> = HashMap::new();

        for entry in &config.quests {
            let desc = Arc::new(QuestDescriptor {
                qid: entry.id,
                category: entry.category,
                name: entry.name.clone(),
                short_desc: entry.short.clone(),
                long_desc: entry.long.clone(),
                prefix: entry.prefix.clone(),
                format: entry.format,
                episode: entry.episode,
                event_mask: entry.event_mask,
                min_players: entry.min_players,
                max_players: entry.max_players,
            });

            let cell = map.entry(entry.id).or_default();

            for ver in &entry.versions {
                let vidx = match version_code_index(ver) {
                    Some(idx) => idx,
                    None => continue,
                };

                for lang in &entry.languages {
                    let lidx = match language_code_index(lang) {
                        Some(idx) => idx,
                        None => continue,
                    };

                    cell.qptr[vidx][lidx] = Some(Arc::clone(&desc));
                }
            }
        }

        QuestCatalog {
            categories: config.categories,
            map,
            dir: dir.to_path_buf(),
        }
    }

    #[inline]
    pub fn lookup(&self, qid: u32) -> Option<&QuestMapEntry> {
        self.map.get(&qid)
    }

    /// Resolve a concrete descriptor for one member by walking their
    /// language chain.
    pub fn resolve(
        &self,
        qid: u32,
        version: Version,
        chain: &[u8],
    ) -> Option<(Arc<QuestDescriptor>, u8)> {
        let entry = self.lookup(qid)?;

        for &lang in chain {
            if let Some(desc) = entry.get(version, lang) {
                return Some((Arc::clone(desc), lang));
            }
        }

        None
    }

    /// Categories whose type matches the lobby's mode.
    pub fn categories_for(&self, ctype: CategoryType) -> Vec<&QuestCategory> {
        self.categories
            .iter()
            .filter(|cat| cat.ctype == ctype)
            .collect()
    }

    pub fn category(&self, id: u32) -> Option<&QuestCategory> {
        self.categories.iter().find(|cat| cat.id == id)
    }

    /// List the quests in a category that the whole lobby can run.
    pub fn list_quests(&self, cat: u32, ctx: &ListingContext) -> Vec<Arc<QuestDescriptor>> {
        let mut qids: Vec<u32> = self
            .map
            .iter()
            .filter(|(_, entry)| {
                entry
                    .qptr
                    .iter()
                    .flatten()
                    .flatten()
                    .next()
                    .map(|d| d.category == cat)
                    .unwrap_or(false)
            })
            .map(|(&qid, _)| qid)
            .collect();

        qids.sort_unstable();

        let mut out = Vec::new();

        'quests: for qid in qids {
            let entry = match self.lookup(qid) {
                Some(entry) => entry,
                None => continue,
            };

            let version = ctx.effective_version();

            if !entry.available_for(version) {
                continue;
            }

            // Any resolvable cell carries the quest-wide fields.
            let sample = match entry.get(version, LANG_ENGLISH).or_else(|| {
                (0..LANG_COUNT as u8).find_map(|lang| entry.get(version, lang))
            }) {
                Some(desc) => desc,
                None => continue,
            };

            if sample.event_mask & (1 << ctx.event) == 0 {
                continue;
            }

            let population = ctx.population as u8;
            if population < sample.min_players || population > sample.max_players {
                continue;
            }

            if ctx.version == Version::Gc && sample.episode != ctx.episode {
                continue;
            }

            // Every present member has to resolve through their chain.
            for member in &ctx.members {
                let chain = language_chain(member.q_lang, member.language, ctx.leader_lang);

                if self.resolve(qid, version, &chain).is_none() {
                    continue 'quests;
                }
            }

            out.push(Arc::clone(sample));
        }

        out
    }

    /// Path of one payload file for a resolved descriptor.
    pub fn payload_path(&self, desc: &QuestDescriptor, version: Version, lang: u8, ext: &str) -> PathBuf {
        let lang_code = LANGUAGE_CODES
            .get(lang as usize)
            .copied()
            .unwrap_or("en");

        self.dir
            .join(format!("{}-{}", version.quest_code(), lang_code))
            .join(format!("{}.{}", desc.prefix, ext))
    }
}

/// Language preferences of one present lobby member.
#[derive(Debug, Clone, Copy)]
pub struct MemberLangs {
    pub q_lang: u8,
    pub language: u8,
}

/// Everything the listing filters consult about the requesting lobby.
#[derive(Debug, Clone)]
pub struct ListingContext {
    pub version: Version,
    /// Set for non-v2 lobbies: DC clients list v1 quests.
    pub v1_compat: bool,
    pub event: u8,
    pub population: usize,
    pub episode: u8,
    pub leader_lang: u8,
    pub members: Vec<MemberLangs>,
}

impl ListingContext {
    pub fn effective_version(&self) -> Version {
        if self.v1_compat && self.version.is_dc() {
            Version::Dcv1
        } else {
            self.version
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> QuestCatalog {
        let config: QuestConfig = serdeconv::from_toml_str(
            r#"
[[categories]]
id = 0
type = "normal"
name = "Retrieval"
description = "Retrieve lost things."

[[categories]]
id = 1
type = "battle"
name = "Battle"

[[quests]]
id = 1
category = 0
name = "Magnitude of Metal"
prefix = "quest1"
format = "bindat"
min_players = 1
max_players = 4
versions = ["v2", "gc"]
languages = ["en", "jp"]

[[quests]]
id = 2
category = 0
name = "Claiming a Stake"
prefix = "quest2"
format = "bindat"
event_mask = 0x2
min_players = 2
versions = ["v2"]
languages = ["en"]

[[quests]]
id = 3
category = 0
name = "Episode Two Thing"
prefix = "quest3"
format = "qst"
episode = 2
versions = ["gc"]
languages = ["en"]
"#,
        )
        .unwrap();

        QuestCatalog::from_config(config, Path::new("/var/quests"))
    }

    fn ctx(version: Version) -> ListingContext {
        ListingContext {
            version,
            v1_compat: false,
            event: 0,
            population: 1,
            episode: 1,
            leader_lang: LANG_ENGLISH,
            members: vec![MemberLangs {
                q_lang: LANG_ENGLISH,
                language: LANG_ENGLISH,
            }],
        }
    }

    #[test]
    fn fallback_chain_walks_in_order() {
        let cat = catalog();

        // Japanese preferred and present.
        let (_, lang) = cat.resolve(1, Version::Dcv2, &language_chain(0, 1, 1)).unwrap();
        assert_eq!(lang, 0);

        // German preferred, falls through to the character language.
        let (_, lang) = cat.resolve(1, Version::Dcv2, &language_chain(2, 1, 1)).unwrap();
        assert_eq!(lang, 1);

        // Nothing resolves on a version with no cells.
        assert!(cat.resolve(1, Version::Bb, &language_chain(1, 1, 1)).is_none());
    }

    #[test]
    fn listing_honors_event_mask() {
        let cat = catalog();

        let mut context = ctx(Version::Dcv2);
        context.population = 2;

        // Event 0: quest 2 wants event bit 1 only.
        let listed = cat.list_quests(0, &context);
        assert!(listed.iter().any(|q| q.qid == 1));
        assert!(!listed.iter().any(|q| q.qid == 2));

        context.event = 1;
        let listed = cat.list_quests(0, &context);
        assert!(listed.iter().any(|q| q.qid == 2));
    }

    #[test]
    fn listing_honors_party_size() {
        let cat = catalog();

        let mut context = ctx(Version::Dcv2);
        context.event = 1;
        context.population = 1;

        // Quest 2 wants at least two players.
        let listed = cat.list_quests(0, &context);
        assert!(!listed.iter().any(|q| q.qid == 2));
    }

    #[test]
    fn gc_episode_gating() {
        let cat = catalog();

        let mut context = ctx(Version::Gc);
        context.episode = 1;
        assert!(!cat.list_quests(0, &context).iter().any(|q| q.qid == 3));

        context.episode = 2;
        assert!(cat.list_quests(0, &context).iter().any(|q| q.qid == 3));
    }

    #[test]
    fn member_chain_falls_back_to_english() {
        let cat = catalog();

        let mut context = ctx(Version::Dcv2);
        // A member preferring Korean; quest 1 has en/jp and the chain
        // still lands on English for them.
        context.members.push(MemberLangs {
            q_lang: 7,
            language: 7,
        });

        assert!(cat.list_quests(0, &context).iter().any(|q| q.qid == 1));
    }

    #[test]
    fn payload_paths_follow_version_and_language() {
        let cat = catalog();
        let (desc, lang) = cat
            .resolve(1, Version::Gc, &language_chain(0, 0, 0))
            .unwrap();

        let path = cat.payload_path(&desc, Version::Gc, lang, "bin");
        assert_eq!(path, PathBuf::from("/var/quests/gc-jp/quest1.bin"));
    }
}
