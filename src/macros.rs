macro_rules! debug_warn {
    ($($x:tt)*) => {
        {
            #[cfg(debug_assertions)]
            {
                tracing::warn!("[Reactive Atom] {}", format_args!($($x)*))
            }
            #[cfg(not(debug_assertions))]
            {
                _ = format_args!($($x)*);
            }
        }
    }
}

pub(crate) use debug_warn;
