extern crate produce;

fn main() {
    let errcode = produce::produce::produce_entry().err().unwrap_or(0);
    std::process::exit(errcode as _);
}
