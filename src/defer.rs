/// Runs the wrapped closure when dropped, including on early return through `?`.
pub struct Defer<F: FnMut()>(pub Option<F>);

impl<F: FnMut()> Drop for Defer<F> {
    fn drop(&mut self) {
        if let Some(mut f) = self.0.take() {
            f()
        }
    }
}

macro_rules! defer {
    ($func:block) => {
        let _defer = $crate::defer::Defer(Some(|| $func));
    };
    ($func:expr) => {
        let _defer = $crate::defer::Defer(Some($func));
    };
}
