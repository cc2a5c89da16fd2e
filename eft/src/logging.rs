/// Queue a log message as an [`Effect`](crate::platform::Effect), tagged
/// with the step it originated from.
///
/// ```text
/// log!(Dedup, effects, log::Level::Debug, "suppressed duplicate {:?}", id);
/// ```
macro_rules! log {
  ($at:ident, $effects:expr, $level:expr, $($arg:tt)*) => {{
    $effects.push($crate::platform::Effect::Log($level,
                                                format!("{}: {}",
                                                        stringify!($at),
                                                        format_args!($($arg)*))));
  }};
}

pub(crate) use log;
