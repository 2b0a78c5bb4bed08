//! Non-repeating filler patterns for overflow probing.
//!
//! A de Bruijn sequence of order `n` contains every `n`-symbol window
//! exactly once, so any slice of it echoed back by a crashing target
//! pinpoints the offset it came from.

/// Alphabet of [`cyclic_pattern`].
pub const CYCLIC_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz";

/// Window length of [`cyclic_pattern`].
pub const CYCLIC_ORDER: usize = 4;

/// De Bruijn sequence B(k, n) over `alphabet`, using the iterative
/// Fredricksen-Kessler-Maiorana construction.
pub fn de_bruijn(alphabet: &[u8], n: usize) -> Vec<u8> {
    let k = alphabet.len();
    if k == 0 || n == 0 {
        return Vec::new();
    }

    let expected = k.saturating_pow(u32::try_from(n).unwrap_or(u32::MAX));
    let mut sequence = Vec::with_capacity(expected.min(1 << 20));
    let mut word: Vec<usize> = vec![0];

    loop {
        // Lyndon words whose length divides n concatenate to the sequence
        if n % word.len() == 0 {
            sequence.extend(
                word.iter()
                    .map(|&i| alphabet[i]),
            );
        }

        let period = word.len();
        while word.len() < n {
            word.push(word[word.len() - period]);
        }

        while word.last() == Some(&(k - 1)) {
            word.pop();
        }
        match word.last_mut() {
            Some(last) => *last += 1,
            None => break,
        }
    }

    sequence
}

/// Exactly `len` bytes of the order-4 lowercase de Bruijn sequence,
/// wrapping around if more is asked for than one period holds.
pub fn cyclic_pattern(len: usize) -> Vec<u8> {
    let period = de_bruijn(CYCLIC_ALPHABET, CYCLIC_ORDER);
    period
        .iter()
        .copied()
        .cycle()
        .take(len)
        .collect()
}

/// Offset of `needle` within the cyclic pattern, if it occurs.
pub fn cyclic_offset(needle: &[u8]) -> Option<usize> {
    if needle.is_empty() {
        return None;
    }
    let period = de_bruijn(CYCLIC_ALPHABET, CYCLIC_ORDER);
    period
        .windows(needle.len())
        .position(|w| w == needle)
}
