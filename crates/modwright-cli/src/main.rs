mod completion;
mod dispatch;
mod flows;
mod render;

#[cfg(test)]
mod tests;

fn main() {
    if let Err(err) = dispatch::run() {
        eprintln!("{err:#}");
        std::process::exit(1);
    }
}
