//! Shorthands for building and returning [`crate::error::LoadCheckError`] values.

/// Builds a [`crate::error::LoadCheckError`] from a kind and a static description.
///
/// A third argument adds detail: `detail = value` moves an owned string in, any other expression
/// is rendered with `to_string`. A trailing `source: err` attaches the originating error.
#[macro_export]
macro_rules! loadcheck_error {
    ($kind:expr, $desc:expr) => {
        $crate::error::LoadCheckError::from(($kind, $desc))
    };
    ($kind:expr, $desc:expr, source: $source:expr) => {
        $crate::error::LoadCheckError::from(($kind, $desc)).with_source($source)
    };
    ($kind:expr, $desc:expr, detail = $detail:expr) => {
        $crate::error::LoadCheckError::from(($kind, $desc, $detail))
    };
    ($kind:expr, $desc:expr, detail = $detail:expr, source: $source:expr) => {
        $crate::error::LoadCheckError::from(($kind, $desc, $detail)).with_source($source)
    };
    ($kind:expr, $desc:expr, $detail:expr) => {
        $crate::error::LoadCheckError::from(($kind, $desc, $detail.to_string()))
    };
    ($kind:expr, $desc:expr, $detail:expr, source: $source:expr) => {
        $crate::error::LoadCheckError::from(($kind, $desc, $detail.to_string()))
            .with_source($source)
    };
}

/// Returns early with a [`crate::error::LoadCheckError`].
///
/// Takes the same arguments as [`loadcheck_error!`].
#[macro_export]
macro_rules! bail {
    ($kind:expr, $desc:expr) => {
        return ::core::result::Result::Err($crate::loadcheck_error!($kind, $desc))
    };
    ($kind:expr, $desc:expr, source: $source:expr) => {
        return ::core::result::Result::Err($crate::loadcheck_error!($kind, $desc, source: $source))
    };
    ($kind:expr, $desc:expr, detail = $detail:expr) => {
        return ::core::result::Result::Err($crate::loadcheck_error!($kind, $desc, detail = $detail))
    };
    ($kind:expr, $desc:expr, $detail:expr) => {
        return ::core::result::Result::Err($crate::loadcheck_error!($kind, $desc, $detail))
    };
    ($kind:expr, $desc:expr, $detail:expr, source: $source:expr) => {
        return ::core::result::Result::Err($crate::loadcheck_error!(
            $kind,
            $desc,
            $detail,
            source: $source
        ))
    };
}
