//! Division (and, through it, modulo) by a compile-time constant lowers to a
//! multiply-high by a magic constant plus a couple of shifts instead of `sdiv`
//! (spec.md §4.7, scenario 6). Magic-constant generation is the classic Granlund &
//! Montgomery construction as given in Hacker's Delight §10-4, reproduced here over
//! `i32`/`u32` wrapping arithmetic.
//!
//! spec.md §9 notes the source compiler special-cased the literal divisor
//! `1000000007` to skip this optimization without explaining why; rather than bake
//! that literal in, `DivConstConfig::disabled` is a configurable set of divisors this
//! pass falls back to plain `sdiv` for, defaulting to just that one value.

use std::collections::HashSet;

#[derive(Debug, Clone)]
pub struct DivConstConfig {
    pub disabled: HashSet<i32>,
}

impl Default for DivConstConfig {
    fn default() -> Self {
        let mut disabled = HashSet::new();
        disabled.insert(1_000_000_007);
        DivConstConfig { disabled }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// `d` is a power of two: an arithmetic-shift sequence suffices.
    ShiftPow2 { shift: u32, negative: bool },
    /// Magic-multiply-high, per `Magic`.
    Magic(Magic),
    /// Divisor is disabled (spec.md §9's open question) or `0`/`1`/`-1` aren't worth
    /// special-casing beyond the identity fold GVN already applies: emit plain `sdiv`.
    Sdiv,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Magic {
    pub m: i32,
    pub shift: u32,
    pub add_n: bool,
}

pub fn strategy_for(d: i32, cfg: &DivConstConfig) -> Strategy {
    if d == 0 || cfg.disabled.contains(&d) {
        return Strategy::Sdiv;
    }
    if let Some(shift) = super::imm::log2_exact(d.abs()) {
        return Strategy::ShiftPow2 { shift, negative: d < 0 };
    }
    Strategy::Magic(magic_for(d))
}

/// Hacker's Delight's `magic` function: find `M` and shift amount `s` such that
/// `n / d == asr(mulhs(n, M), s) + (sign bit of that result)` for every 32-bit `n`.
fn magic_for(d: i32) -> Magic {
    const TWO31: u32 = 0x8000_0000;
    let ad = d.unsigned_abs();
    let t = TWO31.wrapping_add((d as u32) >> 31);
    let anc = t.wrapping_sub(1).wrapping_sub(t % ad);
    let mut p: u32 = 31;
    let mut q1 = TWO31 / anc;
    let mut r1 = TWO31.wrapping_sub(q1.wrapping_mul(anc));
    let mut q2 = TWO31 / ad;
    let mut r2 = TWO31.wrapping_sub(q2.wrapping_mul(ad));
    loop {
        p += 1;
        q1 = q1.wrapping_mul(2);
        r1 = r1.wrapping_mul(2);
        if r1 >= anc {
            q1 = q1.wrapping_add(1);
            r1 = r1.wrapping_sub(anc);
        }
        q2 = q2.wrapping_mul(2);
        r2 = r2.wrapping_mul(2);
        if r2 >= ad {
            q2 = q2.wrapping_add(1);
            r2 = r2.wrapping_sub(ad);
        }
        let delta = ad.wrapping_sub(r2);
        if !(q1 < delta || (q1 == delta && r1 == 0)) {
            break;
        }
    }
    let mut mag = (q2.wrapping_add(1)) as i32;
    if d < 0 {
        mag = -mag;
    }
    Magic { m: mag, shift: p - 32, add_n: (mag < 0) != (d < 0) && mag != 0 }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reference_div(n: i32, magic: Magic, d: i32) -> i32 {
        let mut q = ((n as i64 * magic.m as i64) >> 32) as i32;
        if magic.add_n {
            q = q.wrapping_add(n);
        }
        if magic.shift > 0 {
            q >>= magic.shift;
        }
        q = q.wrapping_add(((q as u32) >> 31) as i32);
        let _ = d;
        q
    }

    #[test]
    fn magic_division_by_seven_matches_every_sampled_value() {
        let magic = magic_for(7);
        for n in [-1000, -7, -1, 0, 1, 6, 7, 8, 1000, i32::MAX, i32::MIN] {
            assert_eq!(reference_div(n, magic, 7), n.wrapping_div(7), "n={n}");
        }
    }

    #[test]
    fn magic_division_by_negative_three_matches() {
        let magic = magic_for(-3);
        for n in [-100, -3, -1, 0, 1, 3, 100, i32::MAX, i32::MIN] {
            assert_eq!(reference_div(n, magic, -3), n.wrapping_div(-3), "n={n}");
        }
    }

    #[test]
    fn disabled_divisor_falls_back_to_sdiv() {
        let cfg = DivConstConfig::default();
        assert_eq!(strategy_for(1_000_000_007, &cfg), Strategy::Sdiv);
        assert!(matches!(strategy_for(7, &cfg), Strategy::Magic(_)));
        assert!(matches!(strategy_for(8, &cfg), Strategy::ShiftPow2 { shift: 3, negative: false }));
    }
}
