//! Property-based tests for the codec layers and option resolution.

use proptest::prelude::*;
use tiervault::{
    backend::BackendKind,
    checksum,
    classification::{reserved_key, resolve, storage_key, user_key_prefix, EngineDefaults},
    compression::{compress, decompress, CompressionAlgorithm},
    encryption::{derive_item_key, mask_degraded, open, seal, unmask_degraded, EncryptionKey},
    Classification, EncryptionAlgorithm, StorageOptions,
};

fn any_compression() -> impl Strategy<Value = CompressionAlgorithm> {
    prop_oneof![
        Just(CompressionAlgorithm::None),
        Just(CompressionAlgorithm::Lz4),
        (1i32..=9).prop_map(|level| CompressionAlgorithm::Zstd { level }),
    ]
}

fn any_classification() -> impl Strategy<Value = Classification> {
    prop_oneof![
        Just(Classification::Public),
        Just(Classification::Internal),
        Just(Classification::Confidential),
        Just(Classification::Secret),
    ]
}

fn any_options() -> impl Strategy<Value = StorageOptions> {
    (
        proptest::option::of(any_classification()),
        proptest::option::of(0u64..10_000_000),
        proptest::option::of(any::<bool>()),
        proptest::option::of(any::<bool>()),
        proptest::option::of(1u64..1_000_000),
        proptest::option::of(1u32..5),
        proptest::option::of(prop_oneof![
            Just(BackendKind::Memory),
            Just(BackendKind::Local),
            Just(BackendKind::Cookie),
        ]),
    )
        .prop_map(
            |(classification, ttl_ms, compress, encrypt, max_size, version, backend)| {
                StorageOptions {
                    classification,
                    ttl: ttl_ms.map(std::time::Duration::from_millis),
                    compress,
                    encrypt,
                    max_size,
                    version,
                    backend,
                    ..StorageOptions::default()
                }
            },
        )
}

fn defaults() -> EngineDefaults {
    EngineDefaults {
        schema_version: 1,
        max_item_size: 5 * 1024 * 1024,
        retry_attempts: 3,
    }
}

proptest! {
    #[test]
    fn prop_decompress_inverts_compress(
        data in proptest::collection::vec(any::<u8>(), 0..8192),
        algo in any_compression(),
    ) {
        let framed = compress(&data, algo).unwrap();
        prop_assert_eq!(decompress(&framed).unwrap(), data);
    }

    #[test]
    fn prop_checksum_catches_single_bit_flip(
        data in proptest::collection::vec(any::<u8>(), 1..2048),
        index in any::<prop::sample::Index>(),
        bit in 0u8..8,
    ) {
        let token = checksum::digest(&data);
        prop_assert!(checksum::verify(&data, &token));

        let mut flipped = data.clone();
        let i = index.index(flipped.len());
        flipped[i] ^= 1 << bit;
        prop_assert!(!checksum::verify(&flipped, &token));
    }

    #[test]
    fn prop_sealed_payload_opens_only_under_its_key(
        data in proptest::collection::vec(any::<u8>(), 0..1024),
        chacha in any::<bool>(),
        key_a in "[a-z]{1,16}",
        key_b in "[a-z]{1,16}",
    ) {
        let algo = if chacha {
            EncryptionAlgorithm::ChaCha20Poly1305
        } else {
            EncryptionAlgorithm::AesGcm256
        };
        let master = EncryptionKey([7u8; 32]);
        let item = derive_item_key(&master, &key_a);
        let sealed = seal(&data, &item, algo).unwrap();
        prop_assert_eq!(open(&sealed, &item).unwrap(), data);

        if key_a != key_b {
            let other = derive_item_key(&master, &key_b);
            prop_assert!(open(&sealed, &other).is_err());
        }
    }

    #[test]
    fn prop_degraded_mask_roundtrips(
        data in proptest::collection::vec(any::<u8>(), 0..1024),
        seed in "[a-z]{1,12}",
    ) {
        let masked = mask_degraded(&data, &seed);
        prop_assert_eq!(unmask_degraded(&masked, &seed).unwrap(), data);
    }

    #[test]
    fn prop_resolve_is_idempotent(options in any_options()) {
        let once = resolve(&options, &defaults());
        let twice = resolve(&once.to_options(), &defaults());
        prop_assert_eq!(once, twice);
    }

    #[test]
    fn prop_user_keys_never_hit_reserved_slots(
        ns in "[a-z]{1,8}",
        key in "[a-z:_-]{1,16}",
        prefix in proptest::option::of("[a-z]{1,8}"),
    ) {
        let skey = storage_key(&ns, prefix.as_deref(), &key);
        prop_assert!(skey.starts_with(&user_key_prefix(&ns)));
        prop_assert_ne!(&skey, &reserved_key(&ns, "cipher-key"));
        prop_assert_ne!(&skey, &reserved_key(&ns, "metrics"));
        prop_assert!(!reserved_key(&ns, "metrics").starts_with(&user_key_prefix(&ns)));
    }
}
