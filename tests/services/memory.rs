use crate::common::{FakeBackend, TestEnv};
use futures::future;
use mi_services::service::config::ServiceConfig;
use mi_services::service::context::ContextKind;
use mi_services::service::{Address, Command, Error, MemoryByte};

fn expected(from: u64, count: u64) -> Vec<u8> {
    (from..from + count).map(FakeBackend::initial).collect()
}

#[test]
fn test_read_fetches_only_missing_parts() {
    let mut env = TestEnv::new();

    assert_eq!(env.read(0x1000, 16), expected(0x1000, 16));
    assert_eq!(env.read(0x1008, 16), expected(0x1008, 16));

    let reads: Vec<_> = env
        .backend
        .issued()
        .into_iter()
        .filter_map(|c| match c {
            Command::DataReadMemoryBytes { address, count, .. } => Some((address.as_u64(), count)),
            _ => None,
        })
        .collect();
    assert_eq!(reads, vec![(0x1000, 16), (0x1010, 8)]);
    assert_eq!(env.cached_ranges(), vec![(0x1000, 24)]);

    // fully cached
    assert_eq!(env.read(0x1004, 20), expected(0x1004, 20));
    assert_eq!(env.backend.memory_reads(), 2);
}

#[test]
fn test_adjacent_reads_merged() {
    let mut env = TestEnv::new();
    env.read(0x100, 4);
    env.read(0x104, 4);
    env.read(0x200, 4);
    assert_eq!(env.cached_ranges(), vec![(0x100, 8), (0x200, 4)]);
}

#[test]
fn test_read_with_offset() {
    let mut env = TestEnv::new();
    let fut = env
        .session
        .read_memory(env.ctx.frame, Address::new(0x1010), -0x10, 1, 4);
    let bytes = env.session.run_until(fut).unwrap();
    assert_eq!(
        bytes.iter().map(|b| b.value).collect::<Vec<_>>(),
        expected(0x1000, 4)
    );
}

#[test]
fn test_zero_length_read() {
    let mut env = TestEnv::new();
    assert!(env.read(0x1000, 0).is_empty());
    assert!(env.backend.issued().is_empty());
}

#[test]
fn test_invalid_arguments() {
    struct TestCase {
        word_size: usize,
        count: i64,
        address: u64,
        offset: i64,
    }
    let test_cases = [
        TestCase {
            word_size: 0,
            count: 4,
            address: 0x1000,
            offset: 0,
        },
        TestCase {
            word_size: 1,
            count: -1,
            address: 0x1000,
            offset: 0,
        },
        TestCase {
            word_size: 2,
            count: 4,
            address: 0x1000,
            offset: 0,
        },
    ];

    let mut env = TestEnv::new();
    for tc in test_cases {
        let fut = env.session.read_memory(
            env.ctx.process,
            Address::new(tc.address),
            tc.offset,
            tc.word_size,
            tc.count,
        );
        assert!(matches!(
            env.session.run_until(fut),
            Err(Error::InvalidArgument(_))
        ));
    }

    let fut = env
        .session
        .read_memory(env.ctx.process, Address::new(u64::MAX - 1), 0, 1, 4);
    assert!(matches!(
        env.session.run_until(fut),
        Err(Error::InconsistentRange(..))
    ));
    let fut = env
        .session
        .read_memory(env.ctx.process, Address::new(0x10), -0x20, 1, 4);
    assert!(matches!(
        env.session.run_until(fut),
        Err(Error::InconsistentRange(..))
    ));

    assert!(env.backend.issued().is_empty());
}

#[test]
fn test_no_memory_context() {
    let mut env = TestEnv::new();
    let orphan = env
        .session
        .add_context(None, ContextKind::Thread { tid: 7 })
        .unwrap();
    let fut = env.session.read_memory(orphan, Address::new(0), 0, 1, 1);
    assert!(matches!(
        env.session.run_until(fut),
        Err(Error::NoMemoryContext(_))
    ));
}

#[test]
fn test_legacy_commands() {
    let mut config = ServiceConfig::default();
    config.memory.bulk_transfer = false;
    let mut env = TestEnv::with_config(config);

    assert_eq!(env.read(0x40, 4), expected(0x40, 4));
    assert!(matches!(
        env.backend.issued()[0],
        Command::DataReadMemory { word_size: 1, count: 4, .. }
    ));

    let mut config = ServiceConfig::default();
    config.memory.bulk_transfer = false;
    config.memory.addressable_size = 2;
    let mut env = TestEnv::with_config(config);
    let fut = env
        .session
        .read_memory(env.ctx.process, Address::new(0x40), 0, 2, 4);
    assert!(matches!(
        env.session.run_until(fut),
        Err(Error::UnsupportedConfiguration(_))
    ));
    assert!(env.backend.issued().is_empty());
}

#[test]
fn test_wide_addressable_unit() {
    let mut config = ServiceConfig::default();
    config.memory.addressable_size = 2;
    let mut env = TestEnv::with_config(config);

    let bytes = env.read_raw(0x10, 2);
    assert_eq!(
        bytes.iter().map(|b| b.value).collect::<Vec<_>>(),
        expected(0x20, 4)
    );
    assert!(matches!(
        env.backend.issued()[0],
        Command::DataReadMemoryBytes { count: 2, .. }
    ));
    assert_eq!(env.cached_ranges(), vec![(0x10, 2)]);
}

#[test]
fn test_concurrent_reads_share_request() {
    let mut env = TestEnv::new();
    let a = env
        .session
        .read_memory(env.ctx.process, Address::new(0x1000), 0, 1, 16);
    let b = env
        .session
        .read_memory(env.ctx.thread, Address::new(0x1000), 0, 1, 16);

    let (a, b) = env.session.run_until(future::join(a, b));
    let (a, b) = (a.unwrap(), b.unwrap());
    assert_eq!(a, b);
    assert_eq!(a.len(), 16);
    assert_eq!(env.backend.memory_reads(), 1);
}

#[test]
fn test_unreadable_gap() {
    let mut env = TestEnv::new();
    env.read(0x2004, 4);
    env.backend.set_unreadable(0x2010, 4);

    let bytes = env.read_raw(0x2000, 0x18);
    assert_eq!(bytes.len(), 0x18);
    assert!(bytes[..8].iter().all(|b| b.valid));
    assert_eq!(
        bytes[..8].iter().map(|b| b.value).collect::<Vec<_>>(),
        expected(0x2000, 8)
    );
    assert!(bytes[8..].iter().all(|b| *b == MemoryByte::INVALID));

    // failed part is not cached
    assert_eq!(env.cached_ranges(), vec![(0x2000, 8)]);
}

#[test]
fn test_write_read_round_trip() {
    let mut env = TestEnv::new();
    let data = [1, 2, 3, 4, 5, 6, 7, 8];
    let fut = env
        .session
        .write_memory(env.ctx.process, Address::new(0x3000), 0, 1, 8, &data);
    env.session.run_until(fut).unwrap();

    assert_eq!(env.backend.peek(0x3000, 8), data);
    assert_eq!(env.read(0x3000, 8), data);

    let changes = env.hooks.memory_changes();
    assert_eq!(changes.len(), 1);
    assert_eq!(
        changes[0],
        (0x3000..0x3008).map(Address::new).collect::<Vec<_>>()
    );
}

#[test]
fn test_write_updates_cached_part_only() {
    let mut env = TestEnv::new();
    env.read(0x3000, 4);

    let fut = env.session.write_memory(
        env.ctx.process,
        Address::new(0x3002),
        0,
        1,
        4,
        &[0xA0, 0xA1, 0xA2, 0xA3],
    );
    env.session.run_until(fut).unwrap();
    assert_eq!(env.cached_ranges(), vec![(0x3000, 4)]);

    let mut want = expected(0x3000, 2);
    want.extend([0xA0, 0xA1, 0xA2, 0xA3]);
    assert_eq!(env.read(0x3000, 6), want);
    // initial read, read back after write, missing tail
    assert_eq!(env.backend.memory_reads(), 3);
}

#[test]
fn test_write_failure_keeps_cache() {
    let mut env = TestEnv::new();
    env.read(0x4000, 4);
    env.backend.fail_writes.set(true);

    let fut = env
        .session
        .write_memory(env.ctx.process, Address::new(0x4000), 0, 1, 4, &[9; 4]);
    assert!(matches!(
        env.session.run_until(fut),
        Err(Error::Backend { .. })
    ));

    assert_eq!(env.cached_ranges(), vec![(0x4000, 4)]);
    assert_eq!(env.read(0x4000, 4), expected(0x4000, 4));
    assert_eq!(env.backend.memory_reads(), 1);
    assert!(env.hooks.memory_changes().is_empty());
}

#[test]
fn test_write_short_buffer() {
    let mut env = TestEnv::new();
    let fut = env
        .session
        .write_memory(env.ctx.process, Address::new(0x4000), 0, 1, 4, &[1, 2]);
    assert!(matches!(
        env.session.run_until(fut),
        Err(Error::InvalidArgument(_))
    ));
    assert!(env.backend.issued().is_empty());

    let fut = env
        .session
        .write_memory(env.ctx.process, Address::new(0x4000), 0, 1, 0, &[]);
    env.session.run_until(fut).unwrap();
    assert!(env.backend.issued().is_empty());
}

#[test]
fn test_fill_memory() {
    let mut env = TestEnv::new();
    let fut = env
        .session
        .fill_memory(env.ctx.process, Address::new(0x5000), 0, 1, 5, &[0xAB, 0xCD]);
    env.session.run_until(fut).unwrap();

    let pattern = [0xAB, 0xCD].repeat(5);
    assert!(env.backend.issued().contains(&Command::DataWriteMemoryBytes {
        address: Address::new(0x5000),
        bytes: pattern.clone(),
    }));
    assert_eq!(env.read(0x5000, 10), pattern);
}

#[test]
fn test_flush_cache() {
    let mut env = TestEnv::new();
    env.read(0x1000, 8);
    env.session.flush_cache(env.ctx.frame).unwrap();
    assert!(env.cached_ranges().is_empty());

    env.read(0x1000, 8);
    assert_eq!(env.backend.memory_reads(), 2);
}

#[test]
fn test_flush_resets_nested_memory_spaces() {
    let mut env = TestEnv::new();
    let space = env
        .session
        .add_context(
            Some(env.ctx.process),
            ContextKind::MemorySpace {
                name: "data".to_string(),
            },
        )
        .unwrap();

    env.read(0x1000, 8);
    let fut = env.session.read_memory(space, Address::new(0x1000), 0, 1, 8);
    env.session.run_until(fut).unwrap();
    // every memory context has own cache
    assert_eq!(env.backend.memory_reads(), 2);
    assert_eq!(
        env.session.memory().cached_ranges(space).unwrap(),
        vec![(Address::new(0x1000), 8)]
    );

    env.session.flush_cache(env.ctx.process).unwrap();
    assert!(env.cached_ranges().is_empty());
    assert!(env.session.memory().cached_ranges(space).unwrap().is_empty());
}

#[test]
fn test_oversized_requests() {
    let mut config = ServiceConfig::default();
    config.memory.addressable_size = 4;
    let mut env = TestEnv::with_config(config);

    let fut = env
        .session
        .read_memory(env.ctx.process, Address::new(0), 0, 4, i64::MAX);
    assert!(matches!(
        env.session.run_until(fut),
        Err(Error::InvalidArgument(_))
    ));

    // units fit into address space, octets overflow 64 bits
    let fut = env
        .session
        .write_memory(env.ctx.process, Address::new(0), 0, 4, 1 << 62, &[0; 4]);
    assert!(matches!(
        env.session.run_until(fut),
        Err(Error::InvalidArgument(_))
    ));

    let fut = env
        .session
        .fill_memory(env.ctx.process, Address::new(0), 0, 4, i64::MAX, &[0; 4]);
    assert!(matches!(
        env.session.run_until(fut),
        Err(Error::InvalidArgument(_))
    ));

    assert!(env.backend.issued().is_empty());
}

#[test]
fn test_request_limit() {
    let mut config = ServiceConfig::default();
    config.memory.max_request_octets = 16;
    let mut env = TestEnv::with_config(config);

    assert_eq!(env.read(0x1000, 16), expected(0x1000, 16));
    let fut = env
        .session
        .read_memory(env.ctx.process, Address::new(0x1000), 0, 1, 17);
    assert!(matches!(
        env.session.run_until(fut),
        Err(Error::InvalidArgument(_))
    ));
    let fut = env
        .session
        .write_memory(env.ctx.process, Address::new(0x1000), 0, 1, 17, &[0; 17]);
    assert!(matches!(
        env.session.run_until(fut),
        Err(Error::InvalidArgument(_))
    ));
    assert_eq!(env.backend.memory_reads(), 1);
    assert!(env.hooks.memory_changes().is_empty());
}
