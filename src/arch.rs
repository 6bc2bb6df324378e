macro_rules! arch_submodules {
    () => {
        cfg_if::cfg_if! {
            if #[cfg(any(target_arch = "x86", target_arch = "x86_64"))] {
                mod x86;
                pub use x86::*;
            }
        }
    };
}
