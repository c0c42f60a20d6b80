pub fn relu_forward(input: &[f32], output: &mut [f32]) {
    for (y, &x) in output.iter_mut().zip(input) {
        // NaN and -0.0 both land on +0.0
        *y = if x > 0.0 { x } else { 0.0 };
    }
}
