//! piece-size arithmetic and small handler helpers

use crate::types::{PaddedPieceSize, UnpaddedPieceSize};

macro_rules! field_required {
    ($name:ident, $ex:expr) => {
        let $name = $ex
            .with_context(|| format!("{} is required", stringify!($name)))
            .abort()?;
    };
}

pub(crate) use field_required;

macro_rules! cloned_required {
    ($name:ident, $ex:expr) => {
        let $name = $ex
            .as_ref()
            .cloned()
            .with_context(|| format!("{} is required", stringify!($name)))
            .abort()?;
    };
}

pub(crate) use cloned_required;

/// The user-bytes capacity of a sector: 127 of every 128 raw bytes.
pub(crate) fn user_bytes_for_sector_size(sector_size: u64) -> UnpaddedPieceSize {
    PaddedPieceSize(sector_size).unpadded()
}

/// Decomposes the remaining unpadded space of a sector into filler piece
/// sizes, ascending.
///
/// Scaled to in-sector bytes (`n + n/127`) the remainder is a plain binary
/// number, and its one-bits are exactly the power-of-two pieces needed to
/// fill the gap.
pub(crate) fn fillers_from_rem(to_fill: UnpaddedPieceSize) -> Vec<UnpaddedPieceSize> {
    let mut n = to_fill.0;
    n += n / 127;

    let mut out = Vec::with_capacity(n.count_ones() as usize);
    while n > 0 {
        // extract the next lowest non-zero bit
        let psize = 1u64 << n.trailing_zeros();
        n ^= psize;

        out.push(PaddedPieceSize(psize).unpadded());
    }

    out
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::{fillers_from_rem, user_bytes_for_sector_size};
    use crate::types::UnpaddedPieceSize;

    #[test]
    fn test_quarter_filled_one_kib_sector() {
        let rem = UnpaddedPieceSize(1016 - 254);
        assert_eq!(
            fillers_from_rem(rem),
            vec![UnpaddedPieceSize(254), UnpaddedPieceSize(508)],
        );
    }

    #[test]
    fn test_empty_sector_is_one_filler() {
        assert_eq!(
            fillers_from_rem(UnpaddedPieceSize(1016)),
            vec![UnpaddedPieceSize(1016)],
        );
    }

    #[test]
    fn test_nothing_left_means_no_fillers() {
        assert!(fillers_from_rem(UnpaddedPieceSize(0)).is_empty());
    }

    #[test]
    fn test_decomposition_properties() {
        // remainders reachable by removing valid pieces from a 32KiB sector
        let capacity = user_bytes_for_sector_size(32 << 10);

        for taken_exp in 0..8u64 {
            let taken = UnpaddedPieceSize(127 << taken_exp);
            taken.validate().expect("valid unpadded piece");

            let rem = UnpaddedPieceSize(capacity.0 - taken.0);

            let fillers = fillers_from_rem(rem);

            let scaled = rem.0 + rem.0 / 127;
            assert_eq!(fillers.len(), scaled.count_ones() as usize);
            assert_eq!(fillers.iter().map(|f| f.0).sum::<u64>(), rem.0);

            let mut sorted = fillers.clone();
            sorted.sort();
            assert_eq!(sorted, fillers, "fillers come out ascending");

            for filler in fillers {
                filler.validate().expect("filler is a valid unpadded size");
            }
        }
    }

    #[test]
    fn test_user_bytes() {
        assert_eq!(user_bytes_for_sector_size(1024).0, 1016);
        assert_eq!(user_bytes_for_sector_size(2048).0, 2032);
    }
}
