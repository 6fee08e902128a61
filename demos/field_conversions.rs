use p4p::{canonical_mod, itor, rtoi, Field, P4pError};

fn main() -> Result<(), P4pError> {
    let field = Field::new(65536)?;
    println!(
        "Z_{} canonical window: [{}, {}]",
        field.order(),
        field.min_element(),
        field.max_element()
    );
    for x in [-40000i64, -32768, 0, 32767, 32768, 100000] {
        println!("mod({x}, 65536) = {}", canonical_mod(x, 65536));
    }

    let data = [-32768, -1000, 0, 1, 32767];
    let reals = itor(&data, field.order(), 1.0);
    let back = rtoi(&reals, field.order(), 1.0);
    for ((x, r), y) in data.iter().zip(&reals).zip(&back) {
        println!("{x:>7} -> {r:+.6} -> {y}");
    }
    Ok(())
}
