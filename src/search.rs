//! Branch-and-bound search over the encoder parameter space.
//!
//! Every tuple is encoded in trial mode against a ceiling on the IDAT size.
//! A trial that crosses the ceiling is abandoned at once; each new best
//! lowers the ceiling to its own size unless a full search was requested.

use std::ops::ControlFlow;

use log::debug;

use crate::error::{ensure_invariant, Result};
use crate::image::Image;
use crate::params::ParamSpace;
use crate::png::encode::{EncodeParams, Encoder};
use crate::png::PNG_UINT_31_MAX;
use crate::report::{Event, Reporter};
use crate::stream::{ChunkPolicy, InputSizes, WriteHook};

/// The winning tuple.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Best {
    /// Encoder parameters.
    pub params: EncodeParams,
    /// Measured IDAT size; 0 when the tuple was adopted without a trial.
    pub idat_size: u64,
}

/// What a search found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SearchResult {
    /// Best tuple, if any trial completed.
    pub best: Option<Best>,
    /// PLTE and tRNS bytes the trials wrote, framing included.
    pub plte_trns_size: u64,
    /// Trials encoded.
    pub trials: usize,
}

impl SearchResult {
    /// True if the best tuple beats the input's IDAT, counting PLTE and tRNS
    /// since reductions may have shrunk them.
    pub fn improves(&self, input: &InputSizes) -> bool {
        self.best.is_some_and(|best| {
            best.idat_size + self.plte_trns_size < input.idat_size + input.plte_trns_size
        })
    }
}

/// Initial IDAT ceiling.
///
/// Unbounded (up to 2^31 - 1) when a new IDAT is mandatory or every trial
/// must complete; otherwise the input's IDAT plus PLTE and tRNS.
pub fn initial_ceiling(needs_new_idat: bool, full: bool, input: &InputSizes) -> u64 {
    if needs_new_idat || full {
        u64::from(PNG_UINT_31_MAX)
    } else {
        input.idat_size + input.plte_trns_size
    }
}

/// Search settings for one image.
#[derive(Debug, Clone, Copy)]
pub struct Search<'a> {
    image: &'a Image,
    space: ParamSpace,
    window_bits: u8,
    policy: ChunkPolicy,
    full: bool,
}

impl<'a> Search<'a> {
    /// Search `space` for `image`.
    pub fn new(image: &'a Image, space: ParamSpace, window_bits: u8, policy: ChunkPolicy, full: bool) -> Self {
        Self {
            image,
            space,
            window_bits,
            policy,
            full,
        }
    }

    /// Run every trial, or none if the only tuple will be used regardless.
    pub fn run(&self, ceiling: u64, needs_new_idat: bool, reporter: &mut dyn Reporter) -> Result<SearchResult> {
        let total = self.space.num_trials();
        ensure_invariant!(total > 0, "Iterations not initialized");
        if total == 1 && needs_new_idat {
            let params = self.space.first(self.window_bits);
            ensure_invariant!(params.is_some(), "Iterations not initialized");
            return Ok(SearchResult {
                best: params.map(|params| Best { params, idat_size: 0 }),
                plte_trns_size: 0,
                trials: 0,
            });
        }

        reporter.report(&Event::TrialsStarted { total });
        let mut encoder = Encoder::new(self.image)?;
        let mut ceiling = ceiling;
        let mut best: Option<Best> = None;
        let mut result = SearchResult::default();
        for params in self.space.trials(self.window_bits) {
            let index = result.trials;
            result.trials += 1;

            let mut hook = WriteHook::trial(ceiling, self.policy);
            let completed = match encoder.encode(&params, &mut hook) {
                Ok(ControlFlow::Continue(())) => true,
                Ok(ControlFlow::Break(())) => false,
                Err(err) if err.is_internal() => return Err(err),
                Err(err) => {
                    debug!("trial {params:?} failed: {err}");
                    false
                }
            };
            let sizes = hook.sizes();
            result.plte_trns_size = sizes.plte_trns_size;
            let idat_size = completed.then_some(sizes.idat_size);
            reporter.report(&Event::Trial {
                index,
                total,
                params,
                idat_size,
            });
            let Some(idat_size) = idat_size else {
                continue;
            };

            if let Some(current) = best {
                if current.idat_size < idat_size {
                    continue;
                }
                // Equal size: a Huffman-only or RLE best stays; any other
                // best gives way to the later tuple.
                if current.idat_size == idat_size && current.params.strategy.is_fast() {
                    continue;
                }
            }
            best = Some(Best { params, idat_size });
            if !self.full {
                ceiling = idat_size;
            }
        }
        ensure_invariant!(result.trials == total, "Inconsistent iteration counter");
        result.best = best;
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::ParamSet;
    use crate::png::{ColorType, Ihdr};
    use crate::report::{NullReporter, RecordingReporter};

    fn noisy(width: u32, height: u32) -> Image {
        let mut image = Image::with_header(Ihdr::new(width, height, 8, ColorType::Rgb));
        let mut state = 0x1234_5678u32;
        for (y, row) in image.rows.iter_mut().enumerate() {
            for (x, byte) in row.iter_mut().enumerate() {
                state ^= state << 13;
                state ^= state >> 17;
                state ^= state << 5;
                // Smooth gradient with a little noise.
                *byte = ((x + y) as u8).wrapping_add((state & 3) as u8);
            }
        }
        image
    }

    fn space(level: u8) -> ParamSpace {
        ParamSpace::resolve(&ParamSpace::default(), Some(level), false).unwrap()
    }

    /// Collects the IDAT size of each completed trial.
    #[derive(Default)]
    struct Trials(Vec<(EncodeParams, Option<u64>)>);

    impl Reporter for Trials {
        fn report(&mut self, event: &Event<'_>) {
            if let Event::Trial {
                params, idat_size, ..
            } = event
            {
                self.0.push((*params, *idat_size));
            }
        }
    }

    #[test]
    fn test_best_is_minimum_of_completed_trials() {
        let image = noisy(24, 24);
        let search = Search::new(&image, space(5), 0, ChunkPolicy::default(), true);
        let mut trials = Trials::default();
        let result = search.run(u64::from(PNG_UINT_31_MAX), true, &mut trials).unwrap();
        assert_eq!(result.trials, 48);
        assert_eq!(trials.0.len(), 48);
        let best = result.best.unwrap();
        let min = trials.0.iter().filter_map(|t| t.1).min().unwrap();
        assert_eq!(best.idat_size, min);
        assert!(trials.0.iter().all(|t| t.1.is_some()));
    }

    #[test]
    fn test_pruned_trials_measure_exactly() {
        let image = noisy(24, 24);
        let mut full = Trials::default();
        Search::new(&image, space(4), 0, ChunkPolicy::default(), true)
            .run(u64::from(PNG_UINT_31_MAX), true, &mut full)
            .unwrap();
        let mut pruned = Trials::default();
        let result = Search::new(&image, space(4), 0, ChunkPolicy::default(), false)
            .run(u64::from(PNG_UINT_31_MAX), true, &mut pruned)
            .unwrap();

        for ((params, unbounded), (same, bounded)) in full.0.iter().zip(&pruned.0) {
            assert_eq!(params, same);
            if let Some(size) = bounded {
                assert_eq!(Some(*size), *unbounded);
            }
        }
        // Adopted sizes never grow.
        let mut running = u64::MAX;
        for size in pruned.0.iter().filter_map(|t| t.1) {
            assert!(size <= running);
            running = size;
        }
        assert_eq!(result.best.map(|b| b.idat_size), Some(running));
    }

    #[test]
    fn test_fast_path_skips_trials() {
        let image = noisy(8, 8);
        let mut reporter = RecordingReporter::default();
        let result = Search::new(&image, space(0), 11, ChunkPolicy::default(), false)
            .run(100, true, &mut reporter)
            .unwrap();
        assert_eq!(result.trials, 0);
        let best = result.best.unwrap();
        assert_eq!(best.idat_size, 0);
        assert_eq!(best.params.window_bits, 11);
        assert!(reporter.lines.is_empty());
    }

    #[test]
    fn test_single_trial_runs_when_optional() {
        let image = noisy(8, 8);
        let result = Search::new(&image, space(0), 0, ChunkPolicy::default(), false)
            .run(u64::from(PNG_UINT_31_MAX), false, &mut NullReporter)
            .unwrap();
        assert_eq!(result.trials, 1);
        assert!(result.best.unwrap().idat_size > 0);
    }

    #[test]
    fn test_tight_ceiling_finds_nothing() {
        let image = noisy(16, 16);
        let result = Search::new(&image, space(2), 0, ChunkPolicy::default(), false)
            .run(4, false, &mut NullReporter)
            .unwrap();
        assert_eq!(result.trials, 8);
        assert_eq!(result.best, None);
        assert!(!result.improves(&InputSizes {
            idat_size: 4,
            ..InputSizes::default()
        }));
    }

    #[test]
    fn test_tie_keeps_fast_strategy() {
        // A constant image compresses to the same size under several strategies.
        let image = Image::with_header(Ihdr::new(4, 1, 8, ColorType::Gray));
        let space = ParamSpace {
            levels: ParamSet::single(9),
            mem_levels: ParamSet::single(8),
            strategies: ParamSet::range(0, 3),
            filters: ParamSet::single(0),
        };
        let mut trials = Trials::default();
        let result = Search::new(&image, space, 0, ChunkPolicy::default(), true)
            .run(u64::from(PNG_UINT_31_MAX), false, &mut trials)
            .unwrap();
        let best = result.best.unwrap();
        let sizes: Vec<u64> = trials.0.iter().filter_map(|t| t.1).collect();
        let min = *sizes.iter().min().unwrap();
        let first_fast_min = trials
            .0
            .iter()
            .find(|(p, s)| p.strategy.is_fast() && *s == Some(min))
            .map(|(p, _)| p.strategy);
        let last_min = trials.0.iter().rev().find(|(_, s)| *s == Some(min)).map(|(p, _)| p.strategy);
        // A fast strategy, once adopted at the minimum, is never displaced.
        assert_eq!(Some(best.params.strategy), first_fast_min.or(last_min));
    }

    #[test]
    fn test_tie_between_slow_strategies_takes_later() {
        let image = Image::with_header(Ihdr::new(4, 1, 8, ColorType::Gray));
        let space = ParamSpace {
            levels: ParamSet::range(8, 9),
            mem_levels: ParamSet::single(8),
            strategies: ParamSet::range(0, 1),
            filters: ParamSet::single(0),
        };
        let mut trials = Trials::default();
        let result = Search::new(&image, space, 0, ChunkPolicy::default(), true)
            .run(u64::from(PNG_UINT_31_MAX), false, &mut trials)
            .unwrap();
        let min = trials.0.iter().filter_map(|t| t.1).min().unwrap();
        let last_min = trials.0.iter().rev().find(|(_, s)| *s == Some(min)).unwrap().0;
        assert_eq!(result.best.unwrap().params, last_min);
        assert_eq!(trials.0.len(), 4);
    }

    #[test]
    fn test_improves_counts_palette_overhead() {
        let result = SearchResult {
            best: Some(Best {
                params: EncodeParams::default(),
                idat_size: 90,
            }),
            plte_trns_size: 20,
            trials: 1,
        };
        let input = InputSizes {
            idat_size: 100,
            plte_trns_size: 15,
            ..InputSizes::default()
        };
        assert!(result.improves(&input));
        let input = InputSizes {
            idat_size: 95,
            plte_trns_size: 15,
            ..InputSizes::default()
        };
        assert!(!result.improves(&input));
    }

    #[test]
    fn test_initial_ceiling() {
        let input = InputSizes {
            idat_size: 100,
            plte_trns_size: 30,
            ..InputSizes::default()
        };
        assert_eq!(initial_ceiling(false, false, &input), 130);
        assert_eq!(initial_ceiling(true, false, &input), u64::from(PNG_UINT_31_MAX));
        assert_eq!(initial_ceiling(false, true, &input), u64::from(PNG_UINT_31_MAX));
    }
}
