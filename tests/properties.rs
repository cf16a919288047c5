//! Property tests for parameter sets, the trial iterator and the codec.

mod support;

use std::collections::HashSet;

use proptest::prelude::*;

use pixopt::compress::{zlib_compress, DeflateParams, Strategy as ZlibStrategy};
use pixopt::png::decode::decode_png;
use pixopt::png::encode::{encode_to_vec, EncodeParams};
use pixopt::png::{ColorType, Ihdr};
use pixopt::stream::ChunkPolicy;
use pixopt::{Image, ParamSet, ParamSpace};
use support::pngs;

fn param_set() -> impl Strategy<Value = ParamSet> {
    proptest::collection::vec(0u8..=ParamSet::MAX, 0..12).prop_map(|values| {
        values
            .into_iter()
            .fold(ParamSet::EMPTY, |set, v| set.union(ParamSet::single(v)))
    })
}

fn subset(lo: u8, hi: u8) -> impl Strategy<Value = ParamSet> {
    proptest::collection::vec(lo..=hi, 1..4).prop_map(|values| {
        values
            .into_iter()
            .fold(ParamSet::EMPTY, |set, v| set.union(ParamSet::single(v)))
    })
}

fn param_space() -> impl Strategy<Value = ParamSpace> {
    (subset(1, 9), subset(1, 9), subset(0, 3), subset(0, 5)).prop_map(
        |(levels, mem_levels, strategies, filters)| ParamSpace {
            levels,
            mem_levels,
            strategies,
            filters,
        },
    )
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_param_set_display_parses_back(set in param_set()) {
        let text = set.to_string();
        prop_assert_eq!(ParamSet::parse(&text).unwrap(), set);
    }

    #[test]
    fn prop_param_set_len_matches_iter(set in param_set()) {
        prop_assert_eq!(set.iter().count(), set.len());
        prop_assert_eq!(set.first(), set.iter().next());
    }

    #[test]
    fn prop_trial_count_matches_iterator(space in param_space()) {
        let trials: Vec<EncodeParams> = space.trials(0).collect();
        prop_assert_eq!(trials.len(), space.num_trials());
        let distinct: HashSet<EncodeParams> = trials.iter().copied().collect();
        prop_assert_eq!(distinct.len(), trials.len());
        prop_assert_eq!(space.first(0).is_some(), !trials.is_empty());
    }

    #[test]
    fn prop_fast_strategies_ignore_level(space in param_space()) {
        for trial in space.trials(0) {
            match trial.strategy {
                ZlibStrategy::HuffmanOnly => prop_assert_eq!(trial.level, 1),
                ZlibStrategy::Rle => prop_assert_eq!(trial.level, 9),
                _ => prop_assert!(space.levels.contains(trial.level)),
            }
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn prop_deflate_inflates_back(
        data in proptest::collection::vec(prop_oneof![Just(0u8), Just(7u8), any::<u8>()], 0..6000),
        level in 1u8..=9,
        mem_level in 1u8..=9,
        strategy in 0u8..=3,
        window_bits in 9u8..=15,
    ) {
        let params = DeflateParams {
            level,
            mem_level,
            strategy: ZlibStrategy::from_index(strategy).unwrap(),
            window_bits,
        };
        let compressed = zlib_compress(&data, &params);
        prop_assert_eq!(pngs::inflate(&compressed), data);
    }

    #[test]
    fn prop_encoded_rows_decode_identically(
        width in 1u32..20,
        height in 1u32..12,
        seed in any::<u64>(),
        filter in 0u8..=5,
        interlace in 0u8..=1,
    ) {
        let mut ihdr = Ihdr::new(width, height, 8, ColorType::Rgb);
        ihdr.interlace_type = interlace;
        let mut image = Image::with_header(ihdr);
        image.rows = support::synthetic::noise(width as usize * 3, height, seed);
        let params = EncodeParams {
            filter,
            ..EncodeParams::default()
        };
        let png = encode_to_vec(&image, &params, ChunkPolicy::default()).unwrap();
        let decoded = decode_png(&png, false).unwrap();
        prop_assert_eq!(&decoded.image.rows, &image.rows);
        prop_assert!(decoded.warnings.is_empty());
    }
}
