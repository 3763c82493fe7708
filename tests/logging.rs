use hex_literal::hex;

use sdmmc_logger::{
    fat::{directory::NameError, FatError, FatType},
    logger::{format_record, FileNaming},
    mbr,
    storage::StorageBackend,
    Block, BlockCount, BlockIdx, FatStorage, LogError, Logger, LoggerConfig, Measurement,
    MemoryBlockDevice, RawBlockStorage, Timestamp,
};

const VOLUME_BLOCKS: usize = 8192;
/// Root directory and first data block, relative to the volume start
const ROOT_DIR: usize = 65;
const DATA_START: usize = 97;

const HEADER: &str = "time,temperature,pressure,humidity\n";

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Write an empty FAT16 volume at `base`: 512 byte clusters, two 32 block
/// FATs and 512 root directory entries.
fn format_fat16(disk: &mut [u8], base: usize) {
    let boot = hex!(
        "EB 3C 90 4D 53 57 49 4E 34 2E 31 00 02 01 01 00
         02 00 02 00 20 F8 20 00 20 00 02 00 00 00 00 00
         00 00 00 00"
    );
    let start = base * Block::LEN;
    disk[start..start + boot.len()].copy_from_slice(&boot);
    disk[start + 510] = 0x55;
    disk[start + 511] = 0xAA;
    for fat in [1, 33] {
        let at = (base + fat) * Block::LEN;
        disk[at..at + 4].copy_from_slice(&[0xF8, 0xFF, 0xFF, 0xFF]);
    }
}

/// FAT32 layout: 32 reserved blocks, two 516 block FATs, then 66000 one
/// block clusters.
const FAT32_BLOCKS: usize = 67064;
const FAT32_FATS: [usize; 2] = [32, 548];
const FAT32_DATA_START: usize = 1064;

/// An empty FAT32 volume whose root directory is cluster 2.
fn fat32_disk() -> Vec<u8> {
    let mut disk = vec![0u8; FAT32_BLOCKS * Block::LEN];
    let boot = hex!(
        "EB 58 90 4D 53 57 49 4E 34 2E 31 00 02 01 20 00
         02 00 00 00 00 F8 00 00 20 00 02 00 00 00 00 00
         F8 05 01 00 04 02 00 00 00 00 00 00 02 00 00 00"
    );
    disk[..boot.len()].copy_from_slice(&boot);
    disk[510] = 0x55;
    disk[511] = 0xAA;
    for fat in FAT32_FATS {
        set_fat32_entry(&mut disk, fat, 0, 0x0FFF_FFF8);
        set_fat32_entry(&mut disk, fat, 1, 0xFFFF_FFFF);
        set_fat32_entry(&mut disk, fat, 2, 0x0FFF_FFFF);
    }
    disk
}

fn fat32_entry(disk: &[u8], fat: usize, cluster: usize) -> u32 {
    let at = fat * Block::LEN + cluster * 4;
    u32::from_le_bytes([disk[at], disk[at + 1], disk[at + 2], disk[at + 3]])
}

fn set_fat32_entry(disk: &mut [u8], fat: usize, cluster: usize, value: u32) {
    let at = fat * Block::LEN + cluster * 4;
    disk[at..at + 4].copy_from_slice(&value.to_le_bytes());
}

fn fat16_disk() -> Vec<u8> {
    let mut disk = vec![0u8; VOLUME_BLOCKS * Block::LEN];
    format_fat16(&mut disk, 0);
    disk
}

fn reading(i: u8) -> Measurement {
    Measurement {
        temperature: 20.0 + f32::from(i) * 0.25,
        pressure: 1013.25,
        humidity: 45.5,
        light: None,
    }
}

fn fat_logger(disk: &mut [u8], config: LoggerConfig) -> Logger<FatStorage<MemoryBlockDevice<'_>>> {
    Logger::new(FatStorage::new(MemoryBlockDevice::new(disk)), config)
}

fn read_back(storage: &mut FatStorage<MemoryBlockDevice<'_>>, name: &str) -> Option<String> {
    storage.init().unwrap();
    let mut contents = vec![0u8; 8192];
    let len = storage.read_file(name, &mut contents).unwrap()?;
    Some(String::from_utf8(contents[..len].to_vec()).unwrap())
}

#[test]
fn start_then_stop_leaves_only_the_header() {
    init_logging();
    let mut disk = fat16_disk();
    let storage = FatStorage::new(MemoryBlockDevice::new(&mut disk));
    let mut logger: Logger<_> = Logger::new(storage, LoggerConfig::default());

    logger.start(&Timestamp::new(12, 34, 56)).unwrap();
    assert!(logger.is_logging());
    assert_eq!(logger.file_name(), Some("1234LOG.TXT"));
    logger.stop().unwrap();
    assert!(!logger.is_logging());

    let mut storage = logger.release();
    assert_eq!(
        read_back(&mut storage, "1234log.txt").as_deref(),
        Some(HEADER)
    );
    drop(storage);

    let entry = &disk[ROOT_DIR * Block::LEN..][..32];
    assert_eq!(&entry[..11], b"1234LOG TXT");
    assert_eq!(u16::from_le_bytes([entry[26], entry[27]]), 2);
    assert_eq!(
        u32::from_le_bytes([entry[28], entry[29], entry[30], entry[31]]),
        HEADER.len() as u32
    );
    assert_eq!(
        &disk[DATA_START * Block::LEN..][..HEADER.len()],
        HEADER.as_bytes()
    );
    // cluster 2 is the end of its chain in both FATs
    assert_eq!(&disk[Block::LEN + 4..][..2], &[0xFF, 0xFF]);
    assert_eq!(&disk[33 * Block::LEN + 4..][..2], &[0xFF, 0xFF]);
}

#[test]
fn sessions_append_to_the_same_file() {
    init_logging();
    let mut disk = fat16_disk();
    let config = LoggerConfig {
        naming: FileNaming::Fixed("DATA.CSV"),
        ..LoggerConfig::default()
    };
    let mut logger = fat_logger(&mut disk, config);

    let mut expected = String::new();
    for session in 0..2u8 {
        logger.start(&Timestamp::new(9, session, 0)).unwrap();
        expected.push_str(HEADER);
        for second in 0..40u8 {
            let time = Timestamp::new(9, session, second);
            let measurement = reading(second);
            logger.append_line(&time, &measurement).unwrap();
            expected.push_str(format_record(&time, &measurement, false).unwrap().as_str());
        }
        logger.stop().unwrap();
    }
    assert_eq!(logger.write_failures(), 0);
    // spans several clusters
    assert!(expected.len() > 4 * Block::LEN);

    let mut storage = logger.release();
    assert_eq!(read_back(&mut storage, "data.csv"), Some(expected));
    assert_eq!(read_back(&mut storage, "OTHER.CSV"), None);
}

#[test]
fn time_of_day_names_give_one_file_per_session() {
    init_logging();
    let mut disk = fat16_disk();
    let config = LoggerConfig {
        light_channel: true,
        ..LoggerConfig::default()
    };
    let mut logger = fat_logger(&mut disk, config);

    let lit = Measurement {
        light: Some(310.5),
        ..reading(0)
    };
    logger.toggle(&Timestamp::new(23, 58, 0)).unwrap();
    logger.append_line(&Timestamp::new(23, 58, 1), &lit).unwrap();
    logger.toggle(&Timestamp::new(23, 59, 0)).unwrap();
    logger.toggle(&Timestamp::new(23, 59, 0)).unwrap();
    logger.append_line(&Timestamp::new(23, 59, 1), &reading(4)).unwrap();
    logger.toggle(&Timestamp::new(23, 59, 2)).unwrap();

    let mut storage = logger.release();
    assert_eq!(
        read_back(&mut storage, "2358LOG.TXT").as_deref(),
        Some("time,temperature,pressure,humidity,light\n23:58:01,20.00,1013.25,45.50,310.50\n")
    );
    assert_eq!(
        read_back(&mut storage, "2359LOG.TXT").as_deref(),
        Some("time,temperature,pressure,humidity,light\n23:59:01,21.00,1013.25,45.50,\n")
    );
}

#[test]
fn volume_inside_an_mbr_partition() {
    init_logging();
    let base = 63;
    let mut disk = vec![0u8; (base + VOLUME_BLOCKS) * Block::LEN];
    let entry = &mut disk[446..462];
    entry[0] = 0x80;
    entry[4] = 0x06;
    entry[8..12].copy_from_slice(&(base as u32).to_le_bytes());
    entry[12..16].copy_from_slice(&(VOLUME_BLOCKS as u32).to_le_bytes());
    disk[510] = 0x55;
    disk[511] = 0xAA;
    format_fat16(&mut disk, base);

    let config = LoggerConfig {
        naming: FileNaming::Fixed("LOG.TXT"),
        ..LoggerConfig::default()
    };
    let mut logger = fat_logger(&mut disk, config);
    logger.start(&Timestamp::default()).unwrap();
    assert_eq!(logger.backend().volume().map(|v| v.base()), Some(BlockIdx(63)));
    logger.append(b"raw bytes\n").unwrap();
    logger.stop().unwrap();

    let mut storage = logger.release();
    let expected = format!("{}raw bytes\n", HEADER);
    assert_eq!(read_back(&mut storage, "LOG.TXT"), Some(expected));
    drop(storage);
    assert_eq!(&disk[(base + ROOT_DIR) * Block::LEN..][..11], b"LOG     TXT");
}

#[test]
fn unusable_cards_keep_the_session_closed() {
    init_logging();
    let mut blank = vec![0u8; 64 * Block::LEN];
    let mut logger: Logger<_> = Logger::new(
        FatStorage::new(MemoryBlockDevice::new(&mut blank)),
        LoggerConfig::default(),
    );
    let result = logger.start(&Timestamp::default());
    assert!(
        matches!(
            result,
            Err(LogError::Init(FatError::Mbr(mbr::Error::InvalidMbrSignature)))
        ),
        "{:?}",
        result
    );
    assert!(!logger.is_logging());

    let mut disk = fat16_disk();
    let config = LoggerConfig {
        naming: FileNaming::Fixed("BAD*.TXT"),
        ..LoggerConfig::default()
    };
    let mut logger = fat_logger(&mut disk, config);
    let result = logger.start(&Timestamp::default());
    assert!(
        matches!(
            result,
            Err(LogError::Open(FatError::InvalidName(NameError::InvalidCharacter(b'*'))))
        ),
        "{:?}",
        result
    );
    assert!(!logger.is_logging());
    logger.append_line(&Timestamp::default(), &reading(1)).unwrap();
    assert_eq!(logger.buffered(), 0);
}

#[test]
fn raw_region_sessions() {
    init_logging();
    let mut disk = vec![0u8; 64 * Block::LEN];
    let device = MemoryBlockDevice::new(&mut disk);
    let storage = RawBlockStorage::new(device, BlockIdx(10), BlockCount(20));
    let mut logger: Logger<_> = Logger::new(storage, LoggerConfig::default());

    logger.start(&Timestamp::new(7, 0, 0)).unwrap();
    for second in 0..3 {
        logger
            .append_line(&Timestamp::new(7, 0, second), &reading(second))
            .unwrap();
    }
    logger.stop().unwrap();

    logger.start(&Timestamp::new(8, 0, 0)).unwrap();
    assert_eq!(logger.backend().next_block(), Some(BlockIdx(13)));
    logger.stop().unwrap();
    drop(logger);

    let block = |idx: usize| &disk[idx * Block::LEN..(idx + 1) * Block::LEN];
    assert!(block(10).starts_with(HEADER.as_bytes()));
    assert!(block(11).starts_with(b"07:00:00,20.00,1013.25,45.50\n07:00:01,20.25,"));
    assert!(block(12).starts_with(HEADER.as_bytes()));
    assert!(block(13).iter().all(|b| *b == 0));
}

#[test]
fn fat32_root_chain_and_entries() {
    init_logging();
    let mut disk = fat32_disk();
    // The root directory runs on from cluster 2 to cluster 9, and cluster 2
    // is full.
    for fat in FAT32_FATS {
        set_fat32_entry(&mut disk, fat, 2, 9);
        set_fat32_entry(&mut disk, fat, 9, 0x0FFF_FFFF);
        // free, with the reserved bits set
        set_fat32_entry(&mut disk, fat, 3, 0xF000_0000);
    }
    for slot in 0..16 {
        let at = FAT32_DATA_START * Block::LEN + slot * 32;
        disk[at..at + 11].copy_from_slice(format!("FILL{:02}  TXT", slot).as_bytes());
        disk[at + 11] = 0x20;
    }

    let config = LoggerConfig {
        naming: FileNaming::Fixed("DATA.CSV"),
        ..LoggerConfig::default()
    };
    let mut logger = fat_logger(&mut disk, config);
    logger.start(&Timestamp::new(10, 0, 0)).unwrap();
    assert_eq!(
        logger.backend().volume().map(|v| v.fat_type()),
        Some(FatType::Fat32)
    );
    let mut expected = String::from(HEADER);
    for second in 0..40u8 {
        let time = Timestamp::new(10, 0, second);
        let measurement = reading(second % 8);
        logger.append_line(&time, &measurement).unwrap();
        expected.push_str(format_record(&time, &measurement, false).unwrap().as_str());
    }
    logger.stop().unwrap();
    assert_eq!(logger.write_failures(), 0);
    assert!(expected.len() > 2 * Block::LEN);

    let mut storage = logger.release();
    assert_eq!(read_back(&mut storage, "DATA.CSV"), Some(expected.clone()));
    assert_eq!(read_back(&mut storage, "FILL03.TXT").as_deref(), Some(""));
    drop(storage);

    // the entry went into the root directory's second cluster
    let entry = &disk[(FAT32_DATA_START + 7) * Block::LEN..][..32];
    assert_eq!(&entry[..11], b"DATA    CSV");
    assert_eq!(u16::from_le_bytes([entry[20], entry[21]]), 0);
    assert_eq!(u16::from_le_bytes([entry[26], entry[27]]), 3);
    assert_eq!(
        u32::from_le_bytes([entry[28], entry[29], entry[30], entry[31]]),
        expected.len() as u32
    );
    assert_eq!(
        &disk[(FAT32_DATA_START + 1) * Block::LEN..][..HEADER.len()],
        HEADER.as_bytes()
    );

    // chain 3 -> 4 -> 5 in both FATs, reserved bits untouched
    for fat in FAT32_FATS {
        assert_eq!(fat32_entry(&disk, fat, 3), 0xF000_0004);
        assert_eq!(fat32_entry(&disk, fat, 4), 5);
        assert_eq!(fat32_entry(&disk, fat, 5), 0x0FFF_FFFF);
        assert_eq!(fat32_entry(&disk, fat, 6), 0);
        assert_eq!(fat32_entry(&disk, fat, 9), 0x0FFF_FFFF);
    }
}
