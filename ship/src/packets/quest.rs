//! Quest menus, info boxes and the streamed delivery of quest payloads.
//!
//! Raw-pair quests send two file-info records followed by interleaved
//! 0x400-byte chunks (`.dat` first each round, then `.bin`), matching
//! the client's download protocol. Container quests are already shaped
//! as that protocol and are only re-chunked for transmission.

use crate::client::Client;
use crate::net::support::{ErrorType, NetworkError, NetworkResult};
use crate::packets::{
    PacketBuf, MENU_ID_QCATEGORY, MENU_ID_QUEST, QUEST_CHUNK_TYPE, QUEST_FILE_TYPE,
    QUEST_INFO_TYPE, QUEST_LIST_TYPE,
};
use crate::quests::{QuestCatalog, QuestCategory, QuestDescriptor};
use crate::version::Version;
use std::fs;
use std::sync::Arc;

pub const QUEST_CHUNK_SIZE: usize = 0x400;

/// The maximum slice of a container file pushed per packet batch.
const QST_STREAM_INCREMENT: usize = 0x10000;

/// Category menu for the lobby's current mode.
pub fn build_quest_categories(recipient: Version, cats: &[&QuestCategory]) -> Vec<u8> {
    let mut pkt = PacketBuf::new(recipient, QUEST_LIST_TYPE, 0);

    for cat in cats {
        pkt.u32(MENU_ID_QCATEGORY);
        pkt.u32(cat.id);
        pkt.text(&cat.name, 0x20);
        pkt.text(&cat.description, 0x70);
    }

    pkt.finish_with_flags(cats.len() as u32)
}

pub fn send_quest_categories(c: &mut Client, cats: &[&QuestCategory]) -> NetworkResult<()> {
    let pkt = build_quest_categories(c.version, cats);
    c.channel.enqueue(pkt)
}

/// Quest menu within a category. The category rides in the menu id's
/// high bits so the selection handler can find its way back.
pub fn build_quest_menu(
    recipient: Version,
    cat: u32,
    quests: &[Arc<QuestDescriptor>],
) -> Vec<u8> {
    let mut pkt = PacketBuf::new(recipient, QUEST_LIST_TYPE, 0);

    for quest in quests {
        pkt.u32(MENU_ID_QUEST | (cat << 8));
        pkt.u32(quest.qid);
        pkt.text(&quest.name, 0x20);
        pkt.text(&quest.short_desc, 0x70);
    }

    pkt.finish_with_flags(quests.len() as u32)
}

pub fn send_quest_menu(
    c: &mut Client,
    cat: u32,
    quests: &[Arc<QuestDescriptor>],
) -> NetworkResult<()> {
    let pkt = build_quest_menu(c.version, cat, quests);
    c.channel.enqueue(pkt)
}

/// Boxed long description shown on a quest info request.
pub fn send_quest_info(c: &mut Client, long_desc: &str) -> NetworkResult<()> {
    let mut pkt = PacketBuf::new(c.version, QUEST_INFO_TYPE, 0);
    pkt.message(long_desc);
    c.channel.enqueue(pkt.finish())
}

fn build_file_info(recipient: Version, ingame_name: &str, filename: &str, length: u32) -> Vec<u8> {
    let mut pkt = PacketBuf::new(recipient, QUEST_FILE_TYPE, 0x02);

    pkt.text_8bit(ingame_name, 0x20);
    pkt.text_8bit(filename, 0x10);
    pkt.u32(length);

    pkt.finish()
}

fn build_chunk(recipient: Version, filename: &str, index: u32, data: &[u8]) -> Vec<u8> {
    let mut pkt = PacketBuf::new(recipient, QUEST_CHUNK_TYPE, index & 0xFF);

    pkt.text_8bit(filename, 0x10);

    let start = pkt.len();
    pkt.zeros(QUEST_CHUNK_SIZE);
    pkt.raw_mut()[start..start + data.len()].copy_from_slice(data);

    pkt.u32(data.len() as u32);

    pkt.finish()
}

/// Format the whole delivery sequence for a raw-pair quest: two
/// file-info records, then interleaved chunks until both files drain.
pub fn build_quest_stream(
    recipient: Version,
    quest_name: &str,
    prefix: &str,
    bin: &[u8],
    dat: &[u8],
) -> Vec<Vec<u8>> {
    let ingame_name = format!("PSO/{}", quest_name);
    let bin_name = format!("{}.bin", prefix);
    let dat_name = format!("{}.dat", prefix);

    let mut out = Vec::new();

    out.push(build_file_info(recipient, &ingame_name, &dat_name, dat.len() as u32));
    out.push(build_file_info(recipient, &ingame_name, &bin_name, bin.len() as u32));

    let mut bin_off = 0;
    let mut dat_off = 0;
    let mut chunk = 0u32;

    while bin_off < bin.len() || dat_off < dat.len() {
        if dat_off < dat.len() {
            let end = (dat_off + QUEST_CHUNK_SIZE).min(dat.len());
            out.push(build_chunk(recipient, &dat_name, chunk, &dat[dat_off..end]));
            dat_off = end;
        }

        if bin_off < bin.len() {
            let end = (bin_off + QUEST_CHUNK_SIZE).min(bin.len());
            out.push(build_chunk(recipient, &bin_name, chunk, &bin[bin_off..end]));
            bin_off = end;
        }

        chunk += 1;
    }

    out
}

/// Stream a raw-pair quest to one client.
pub fn send_quest_bindat(
    c: &mut Client,
    catalog: &QuestCatalog,
    desc: &QuestDescriptor,
    version: Version,
    lang: u8,
) -> NetworkResult<()> {
    if c.version == Version::Ep3 {
        return Err(NetworkError::Fatal(ErrorType::UnknownVersion));
    }

    let bin_path = catalog.payload_path(desc, version, lang, "bin");
    let dat_path = catalog.payload_path(desc, version, lang, "dat");

    let bin = fs::read(&bin_path).map_err(NetworkError::from)?;
    let dat = fs::read(&dat_path).map_err(NetworkError::from)?;

    for pkt in build_quest_stream(c.version, &desc.name, &desc.prefix, &bin, &dat) {
        c.channel.enqueue(pkt)?;
    }

    Ok(())
}

/// Stream a prepackaged container quest. The file is already shaped as
/// the client's download protocol; the server only slices it.
pub fn send_quest_qst(
    c: &mut Client,
    catalog: &QuestCatalog,
    desc: &QuestDescriptor,
    version: Version,
    lang: u8,
) -> NetworkResult<()> {
    let path = catalog.payload_path(desc, version, lang, "qst");
    let data = fs::read(&path).map_err(NetworkError::from)?;

    // A container that is not header-aligned would desynchronize the
    // client's framing once encrypted.
    if data.len() % c.version.hdr_size() != 0 {
        return Err(NetworkError::Fatal(ErrorType::BadLength));
    }

    for slice in data.chunks(QST_STREAM_INCREMENT) {
        c.channel.enqueue(slice.to_vec())?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::frame::Header;

    #[test]
    fn stream_interleaves_dat_then_bin() {
        let bin = vec![1u8; QUEST_CHUNK_SIZE + 10];
        let dat = vec![2u8; QUEST_CHUNK_SIZE * 2 + 5];

        let pkts = build_quest_stream(Version::Dcv2, "Metal", "q1", &bin, &dat);

        // 2 file infos, then rounds: (dat,bin), (dat,bin), (dat).
        assert_eq!(pkts.len(), 2 + 5);

        let hdr = Header::parse(Version::Dcv2, &pkts[0]);
        assert_eq!(hdr.pkt_type, QUEST_FILE_TYPE);
        assert_eq!(hdr.flags, 0x02);

        // First chunk is the dat file, chunk index 0.
        let hdr = Header::parse(Version::Dcv2, &pkts[2]);
        assert_eq!(hdr.pkt_type, QUEST_CHUNK_TYPE);
        assert_eq!(hdr.flags, 0);
        assert_eq!(&pkts[2][4..4 + 6], b"q1.dat");

        // Second round carries chunk index 1 on both files.
        assert_eq!(Header::parse(Version::Dcv2, &pkts[4]).flags, 1);
        assert_eq!(Header::parse(Version::Dcv2, &pkts[5]).flags, 1);

        // Final dat chunk declares the short tail length.
        let last = pkts.last().unwrap();
        let len_off = last.len() - 4;
        let tail = u32::from_le_bytes([
            last[len_off],
            last[len_off + 1],
            last[len_off + 2],
            last[len_off + 3],
        ]);
        assert_eq!(tail, 5);
    }

    #[test]
    fn file_info_declares_lengths() {
        let bin = vec![0u8; 100];
        let dat = vec![0u8; 200];

        let pkts = build_quest_stream(Version::Gc, "Metal", "q1", &bin, &dat);

        // dat info first, then bin info; length is the last field.
        let dat_info = &pkts[0];
        let len_off = dat_info.len() - 4;
        assert_eq!(dat_info[len_off], 200);

        let bin_info = &pkts[1];
        let len_off = bin_info.len() - 4;
        assert_eq!(bin_info[len_off], 100);

        // The in-game title carries the PSO/ prefix.
        assert_eq!(&dat_info[4..4 + 9], b"PSO/Metal");
    }

    #[test]
    fn chunks_are_fixed_width() {
        let pkts = build_quest_stream(Version::Dcv2, "Q", "q", &[9u8; 3], &[8u8; 3]);

        for pkt in &pkts[2..] {
            // hdr + filename + data block + length.
            assert_eq!(pkt.len(), 4 + 0x10 + QUEST_CHUNK_SIZE + 4);
        }
    }

    #[test]
    fn category_menu_counts_rows() {
        let cats = vec![QuestCategory {
            id: 0,
            ctype: crate::quests::CategoryType::Normal,
            name: "Retrieval".to_string(),
            description: "Find things.".to_string(),
        }];
        let refs: Vec<&QuestCategory> = cats.iter().collect();

        let pkt = build_quest_categories(Version::Dcv2, &refs);
        let hdr = Header::parse(Version::Dcv2, &pkt);

        assert_eq!(hdr.pkt_type, QUEST_LIST_TYPE);
        assert_eq!(hdr.flags, 1);
        assert_eq!(pkt.len(), 4 + 8 + 0x20 + 0x70);
    }
}
