use crate::input::Dictionary;
use rand::Rng;

/// A `Mutator` transforms one raw byte input into a new candidate input.
///
/// The worker loop owns a mutator per thread; mutators see the optional
/// dictionary loaded at startup but never touch shared mutable state, so
/// they need no synchronization.
pub trait Mutator<R: Rng + ?Sized>: Send + Sync {
    /// Produces a new input based on `input_opt`.
    ///
    /// `None` (or an empty slice) means "start from scratch": the mutator
    /// must still return something non-empty to keep the loop moving.
    /// `max_size` caps the output length.
    fn mutate(
        &mut self,
        input_opt: Option<&[u8]>,
        rng: &mut R,
        dictionary: Option<&Dictionary>,
        max_size: usize,
    ) -> Result<Vec<u8>, anyhow::Error>;
}

/// Nudges a single randomly chosen byte by a small random delta.
///
/// Preserves length; an empty or absent input becomes a single zero byte
/// first so there is always something to mutate.
#[derive(Debug, Default, Clone, Copy)]
pub struct ByteNudgeMutator;

impl<R: Rng + ?Sized> Mutator<R> for ByteNudgeMutator {
    fn mutate(
        &mut self,
        input_opt: Option<&[u8]>,
        rng: &mut R,
        _dictionary: Option<&Dictionary>,
        max_size: usize,
    ) -> Result<Vec<u8>, anyhow::Error> {
        let mut bytes = match input_opt {
            Some(input) if !input.is_empty() => input.to_vec(),
            _ => vec![0u8; 1],
        };
        bytes.truncate(max_size.max(1));

        let delta = rng.random_range(1u8..=15u8);
        let index = rng.random_range(0..bytes.len());
        bytes[index] = bytes[index].wrapping_add(delta);

        Ok(bytes)
    }
}

/// Splices a random dictionary token into the input at a random offset.
///
/// Falls back to [`ByteNudgeMutator`] behavior when no dictionary is loaded
/// or it is empty, so a worker can use this unconditionally.
#[derive(Debug, Default, Clone, Copy)]
pub struct DictionaryInsertMutator;

impl<R: Rng + ?Sized> Mutator<R> for DictionaryInsertMutator {
    fn mutate(
        &mut self,
        input_opt: Option<&[u8]>,
        rng: &mut R,
        dictionary: Option<&Dictionary>,
        max_size: usize,
    ) -> Result<Vec<u8>, anyhow::Error> {
        let dictionary = match dictionary {
            Some(dict) if !dict.is_empty() => dict,
            _ => {
                return ByteNudgeMutator.mutate(input_opt, rng, None, max_size);
            }
        };

        let base: Vec<u8> = match input_opt {
            Some(input) => input.to_vec(),
            None => Vec::new(),
        };

        let token_id = rng.random_range(0..dictionary.len());
        let token = dictionary
            .get(token_id)
            .ok_or_else(|| anyhow::anyhow!("dictionary token {token_id} vanished"))?;

        let offset = if base.is_empty() {
            0
        } else {
            rng.random_range(0..=base.len())
        };

        let mut out = Vec::with_capacity(base.len() + token.len());
        out.extend_from_slice(&base[..offset]);
        out.extend_from_slice(token);
        out.extend_from_slice(&base[offset..]);
        out.truncate(max_size.max(1));

        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand_chacha::ChaCha8Rng;
    use rand_core::SeedableRng;

    #[test]
    fn byte_nudge_changes_exactly_length_preserving() {
        let mut mutator = ByteNudgeMutator;
        let mut rng = ChaCha8Rng::from_seed([0u8; 32]);
        let input: Vec<u8> = vec![10, 20, 30];

        let mutated = mutator
            .mutate(Some(&input), &mut rng, None, usize::MAX)
            .unwrap();
        assert_ne!(input, mutated);
        assert_eq!(input.len(), mutated.len());
        let differing = input
            .iter()
            .zip(mutated.iter())
            .filter(|(a, b)| a != b)
            .count();
        assert_eq!(differing, 1, "exactly one byte should change");
    }

    #[test]
    fn byte_nudge_handles_empty_and_none_input() {
        let mut mutator = ByteNudgeMutator;
        let mut rng = ChaCha8Rng::from_seed([1u8; 32]);

        let from_empty = mutator
            .mutate(Some(&[]), &mut rng, None, usize::MAX)
            .unwrap();
        assert_eq!(from_empty.len(), 1);

        let from_none = mutator.mutate(None, &mut rng, None, usize::MAX).unwrap();
        assert_eq!(from_none.len(), 1);
    }

    #[test]
    fn dictionary_insert_embeds_a_token() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokens.dict");
        std::fs::write(&path, "MAGIC\n").unwrap();
        let dict = Dictionary::load(&path).unwrap();

        let mut mutator = DictionaryInsertMutator;
        let mut rng = ChaCha8Rng::from_seed([2u8; 32]);
        let input: Vec<u8> = vec![1, 2, 3, 4];

        let mutated = mutator
            .mutate(Some(&input), &mut rng, Some(&dict), usize::MAX)
            .unwrap();
        assert_eq!(mutated.len(), input.len() + 5);
        assert!(
            mutated.windows(5).any(|w| w == b"MAGIC"),
            "token should appear contiguously: {mutated:?}"
        );
    }

    #[test]
    fn dictionary_insert_without_dictionary_falls_back() {
        let mut mutator = DictionaryInsertMutator;
        let mut rng = ChaCha8Rng::from_seed([3u8; 32]);
        let input: Vec<u8> = vec![7, 7, 7];

        let mutated = mutator
            .mutate(Some(&input), &mut rng, None, usize::MAX)
            .unwrap();
        assert_eq!(mutated.len(), input.len(), "fallback preserves length");
        assert_ne!(mutated, input);
    }

    #[test]
    fn mutators_respect_max_size() {
        let mut mutator = ByteNudgeMutator;
        let mut rng = ChaCha8Rng::from_seed([4u8; 32]);
        let input = vec![0u8; 64];
        let mutated = mutator.mutate(Some(&input), &mut rng, None, 16).unwrap();
        assert!(mutated.len() <= 16);
    }
}
