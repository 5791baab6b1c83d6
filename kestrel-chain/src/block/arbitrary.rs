use chrono::{TimeZone, Utc};
use proptest::prelude::*;

use crate::work::difficulty::CompactDifficulty;

use super::{merkle, Hash, Header, Height};

impl Arbitrary for Hash {
    type Parameters = ();

    fn arbitrary_with(_args: ()) -> Self::Strategy {
        any::<[u8; 32]>().prop_map(Hash).boxed()
    }

    type Strategy = BoxedStrategy<Self>;
}

impl Arbitrary for merkle::Root {
    type Parameters = ();

    fn arbitrary_with(_args: ()) -> Self::Strategy {
        any::<[u8; 32]>().prop_map(merkle::Root).boxed()
    }

    type Strategy = BoxedStrategy<Self>;
}

impl Arbitrary for Height {
    type Parameters = ();

    fn arbitrary_with(_args: ()) -> Self::Strategy {
        (Height::MIN.0..=Height::MAX.0).prop_map(Height).boxed()
    }

    type Strategy = BoxedStrategy<Self>;
}

impl Arbitrary for Header {
    type Parameters = ();

    fn arbitrary_with(_args: ()) -> Self::Strategy {
        (
            any::<u32>(),
            any::<Hash>(),
            any::<merkle::Root>(),
            // Serialized times are u32 seconds.
            any::<u32>(),
            any::<u32>(),
            any::<u32>(),
        )
            .prop_map(|(version, previous, root, time, nbits, nonce)| {
                Header::new(
                    version,
                    previous,
                    root,
                    Utc.timestamp(time as i64, 0),
                    CompactDifficulty(nbits),
                    nonce,
                )
            })
            .boxed()
    }

    type Strategy = BoxedStrategy<Self>;
}
